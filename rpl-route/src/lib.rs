//! Route cache backed by a pluggable FIB adapter. Grounded on
//! `original_source/RPL/route_cache.py`'s `RouteCache`/`Route`, with
//! `lookup_nexthop` narrowed to the single-target signature every call site
//! in this workspace actually needs (the original returns a list of
//! `Route`s filterable by nexthop/target; nothing downstream of it here
//! ever wants more than "the next hop for this target", so that is all the
//! cache exposes).

use rpl_common::Address;
use std::collections::HashSet;
use std::net::Ipv6Addr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    Default,
    Prefix(Ipv6Addr, u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub target: RouteTarget,
    pub nexthop: Ipv6Addr,
    pub nexthop_iface: String,
    pub onehop: bool,
}

/// Installs/withdraws routes in the kernel FIB. A real adapter is an
/// external collaborator outside this core's scope; only a no-op
/// implementation lives here.
pub trait FibAdapter: Send + Sync {
    fn add_route(&self, route: &Route) -> bool;
    fn remove_route(&self, route: &Route) -> bool;
}

pub struct NoopFibAdapter;

impl FibAdapter for NoopFibAdapter {
    fn add_route(&self, route: &Route) -> bool {
        debug!(?route, "no-op FIB adapter: would add route");
        true
    }

    fn remove_route(&self, route: &Route) -> bool {
        debug!(?route, "no-op FIB adapter: would remove route");
        true
    }
}

pub struct RouteCache {
    routes: HashSet<Route>,
    fib: Box<dyn FibAdapter>,
}

impl RouteCache {
    pub fn new(fib: Box<dyn FibAdapter>) -> Self {
        Self { routes: HashSet::new(), fib }
    }

    /// Idempotent: returns whether the route was newly inserted.
    pub fn add_route(&mut self, route: Route) -> bool {
        if self.routes.contains(&route) {
            return false;
        }
        self.fib.add_route(&route);
        self.routes.insert(route)
    }

    pub fn add_routes(&mut self, routes: impl IntoIterator<Item = Route>) {
        for route in routes {
            self.add_route(route);
        }
    }

    /// Idempotent: returns whether the route was actually present.
    pub fn remove_route(&mut self, route: &Route) -> bool {
        if self.routes.remove(route) {
            self.fib.remove_route(route);
            true
        } else {
            false
        }
    }

    pub fn remove_routes<'a>(&mut self, routes: impl Iterator<Item = &'a Route>) {
        for route in routes {
            self.remove_route(route);
        }
    }

    pub fn lookup_nexthop(&self, target: &RouteTarget) -> Option<Ipv6Addr> {
        self.routes.iter().find(|r| &r.target == target).map(|r| r.nexthop)
    }

    /// Removes every route whose next hop is `nexthop`, regardless of
    /// target. Returns whether anything was removed.
    pub fn remove_nexthop(&mut self, nexthop: Ipv6Addr) -> bool {
        let victims: Vec<Route> = self.routes.iter().filter(|r| r.nexthop == nexthop).cloned().collect();
        let any = !victims.is_empty();
        for route in &victims {
            self.remove_route(route);
        }
        any
    }

    pub fn empty_cache(&mut self) {
        let all: Vec<Route> = self.routes.iter().cloned().collect();
        self.remove_routes(all.iter());
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }
}

/// A downward route target must never be one of this node's own assigned
/// addresses: a DAO advertising a route back to ourselves is nonsensical
/// and would shadow the FIB's notion of a locally-owned prefix.
pub fn target_is_self_assigned(target: &RouteTarget, assigned: &[Address]) -> bool {
    match target {
        RouteTarget::Default => false,
        RouteTarget::Prefix(addr, _) => assigned.iter().any(|a| a.inner() == *addr),
    }
}
