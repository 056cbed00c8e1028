//! A single tracked DODAG version: its configuration, its rank, its
//! downward routing state, and the wire messages it builds. Grounded on
//! `original_source/RPL/dodag.py`'s `Dodag`, minus the back-references into
//! `gv.neighbor_cache`/`gv.route_cache` that method reaches for — those are
//! supplied by the caller (`rpl-engine`) as plain arguments instead, the same
//! split `rpl-neighbor` makes.

use crate::of0::RankCandidate;
use rpl_common::constants::{
    DEFAULT_DAO_NO_PATH_TRANS, DEFAULT_DIO_INTERVAL_DOUBLINGS, DEFAULT_DIO_INTERVAL_MIN, DEFAULT_DIO_REDUNDANCY_CONSTANT,
    DEFAULT_MAX_RANK_INCREASE, DEFAULT_MIN_HOP_RANK_INCREASE, INFINITE_RANK, MOP_STORING_NO_MULTICAST, ROOT_RANK,
};
use rpl_common::{Address, Lollipop, NodeHandle};
use rpl_route::{Route, RouteTarget};
use rpl_trickle::Trickle;
use rpl_wire::message::{Dao, DaoAck, Dio, RplBody, RplMessage};
use rpl_wire::option::RplOption;
use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

/// Number of hops' worth of rank a single OF0 step adds: `(3*Rf + Sf) *
/// MinHopRankIncrease` with the fixed `Rf = 1`, `Sf = 0` this implementation
/// uses (RFC 6552 §5.1).
const RANK_FACTOR: u32 = 3;

pub struct Dodag {
    pub instance_id: u8,
    pub dodag_id: Ipv6Addr,
    pub version: Lollipop,
    pub grounded: bool,
    pub mop: u8,
    pub prf: u8,
    pub dtsn: Lollipop,

    pub authenticated: bool,
    pub pcs: u8,
    pub dio_int_doublings: u8,
    pub dio_int_min: u8,
    pub dio_redundancy_const: u8,
    pub max_rank_increase: u16,
    pub min_hop_rank_increase: u16,
    pub ocp: u16,
    pub default_lifetime: u8,
    pub lifetime_unit: u16,

    pub rank: u16,
    pub lowest_rank_advertized: u16,
    pub is_root: bool,
    pub active: bool,
    pub advertised_prefixes: Vec<Ipv6Addr>,
    pub preferred_parent: Option<NodeHandle>,

    pub downward_routes: HashSet<Route>,
    pub no_path_routes: HashSet<Route>,
    pub no_path_routes_trans: u8,

    pub last_dao_sequence: Lollipop,
    pub last_path_sequence: Lollipop,
    pub dao_ack_armed: bool,
    pub dao_trans_retry: u8,

    pub last_dio: Instant,
    pub dio_timer: Trickle,
}

impl Dodag {
    fn default_trickle() -> Trickle {
        Trickle::new(
            Duration::from_millis(1u64 << DEFAULT_DIO_INTERVAL_MIN),
            DEFAULT_DIO_INTERVAL_DOUBLINGS,
            DEFAULT_DIO_REDUNDANCY_CONSTANT,
        )
    }

    /// This node is the DODAG root: rank is fixed at `ROOT_RANK`, the DODAG
    /// is grounded and immediately active.
    pub fn new_root(instance_id: u8, dodag_id: Ipv6Addr, prefixes: Vec<Ipv6Addr>) -> Self {
        Self {
            instance_id,
            dodag_id,
            version: Lollipop::default(),
            grounded: true,
            mop: MOP_STORING_NO_MULTICAST,
            prf: 0,
            dtsn: Lollipop::default(),

            authenticated: false,
            pcs: 0,
            dio_int_doublings: DEFAULT_DIO_INTERVAL_DOUBLINGS,
            dio_int_min: DEFAULT_DIO_INTERVAL_MIN,
            dio_redundancy_const: DEFAULT_DIO_REDUNDANCY_CONSTANT,
            max_rank_increase: DEFAULT_MAX_RANK_INCREASE,
            min_hop_rank_increase: DEFAULT_MIN_HOP_RANK_INCREASE,
            ocp: 0,
            default_lifetime: 0xFF,
            lifetime_unit: 60,

            rank: ROOT_RANK,
            lowest_rank_advertized: ROOT_RANK,
            is_root: true,
            active: true,
            advertised_prefixes: prefixes,
            preferred_parent: None,

            downward_routes: HashSet::new(),
            no_path_routes: HashSet::new(),
            no_path_routes_trans: 0,

            last_dao_sequence: Lollipop::default(),
            last_path_sequence: Lollipop::default(),
            dao_ack_armed: false,
            dao_trans_retry: 0,

            last_dio: Instant::now(),
            dio_timer: Self::default_trickle(),
        }
    }

    /// A DODAG version this node learned about from a received DIO. Rank
    /// starts at `INFINITE_RANK` until a preferred parent is chosen;
    /// `active` stays false until the engine's parent selection promotes it.
    pub fn new_learned(instance_id: u8, version: Lollipop, grounded: bool, mop: u8, prf: u8, dtsn: Lollipop, dodag_id: Ipv6Addr) -> Self {
        Self {
            instance_id,
            dodag_id,
            version,
            grounded,
            mop,
            prf,
            dtsn,

            authenticated: false,
            pcs: 0,
            dio_int_doublings: DEFAULT_DIO_INTERVAL_DOUBLINGS,
            dio_int_min: DEFAULT_DIO_INTERVAL_MIN,
            dio_redundancy_const: DEFAULT_DIO_REDUNDANCY_CONSTANT,
            max_rank_increase: DEFAULT_MAX_RANK_INCREASE,
            min_hop_rank_increase: DEFAULT_MIN_HOP_RANK_INCREASE,
            ocp: 0,
            default_lifetime: 0xFF,
            lifetime_unit: 60,

            rank: INFINITE_RANK,
            lowest_rank_advertized: INFINITE_RANK,
            is_root: false,
            active: false,
            advertised_prefixes: Vec::new(),
            preferred_parent: None,

            downward_routes: HashSet::new(),
            no_path_routes: HashSet::new(),
            no_path_routes_trans: 0,

            last_dao_sequence: Lollipop::default(),
            last_path_sequence: Lollipop::default(),
            dao_ack_armed: false,
            dao_trans_retry: 0,

            last_dio: Instant::now(),
            dio_timer: Self::default_trickle(),
        }
    }

    /// `DAGRank(rank) = floor(rank / MinHopRankIncrease)`, RFC 6550 §3.5.1.
    pub fn dag_rank(&self, rank: u16) -> u16 {
        if self.min_hop_rank_increase == 0 {
            return rank;
        }
        rank / self.min_hop_rank_increase
    }

    /// The rank this node would advertise if it picked `parent_rank` as its
    /// preferred parent's rank, capped at `INFINITE_RANK`.
    pub fn compute_rank_increase(&self, parent_rank: u16) -> u16 {
        let increase = RANK_FACTOR * self.min_hop_rank_increase as u32;
        let rank = parent_rank as u32 + increase;
        rank.min(INFINITE_RANK as u32) as u16
    }

    pub fn to_rank_candidate(&self, rank: u16, preferred: bool) -> RankCandidate {
        RankCandidate {
            ocp: self.ocp,
            instance_id: self.instance_id,
            grounded: self.grounded,
            prf: self.prf,
            dodag_id: self.dodag_id,
            version: self.version,
            rank,
            preferred,
            last_dio: self.last_dio,
        }
    }

    pub fn note_dio_received(&mut self) {
        self.last_dio = Instant::now();
    }

    /// Applies a received DODAG Configuration option. Trickle's own running
    /// interval is left untouched: rewinding it mid-interval on every DIO
    /// that merely repeats the existing configuration would defeat Trickle's
    /// suppression, so a changed `Imin`/doublings/`k` only takes effect the
    /// next time the timer is rebuilt (global repair, or this DODAG being
    /// newly learned).
    #[allow(clippy::too_many_arguments)]
    pub fn apply_configuration(
        &mut self,
        authenticated: bool,
        pcs: u8,
        dio_int_doublings: u8,
        dio_int_min: u8,
        dio_redundancy_const: u8,
        max_rank_increase: u16,
        min_hop_rank_increase: u16,
        ocp: u16,
        default_lifetime: u8,
        lifetime_unit: u16,
    ) {
        self.authenticated = authenticated;
        self.pcs = pcs;
        self.dio_int_doublings = dio_int_doublings;
        self.dio_int_min = dio_int_min;
        self.dio_redundancy_const = dio_redundancy_const;
        self.max_rank_increase = max_rank_increase;
        self.min_hop_rank_increase = min_hop_rank_increase;
        self.ocp = ocp;
        self.default_lifetime = default_lifetime;
        self.lifetime_unit = lifetime_unit;
    }

    /// RFC 6550 §8.2.2.5: set rank to infinite. The caller is responsible for
    /// sending the poisoning DIO and, on a full shutdown, the accompanying
    /// No-Path DAOs.
    pub fn poison(&mut self) {
        self.rank = INFINITE_RANK;
    }

    /// Clears every downward route this DODAG is forwarding and hands them
    /// back to the caller so the global route cache can withdraw them too.
    pub fn downward_routes_reset(&mut self) -> HashSet<Route> {
        std::mem::take(&mut self.downward_routes)
    }

    /// Inserts a downward route learned from a DAO. A route back to one of
    /// this node's own addresses is rejected outright.
    pub fn downward_route_add(&mut self, route: Route, self_assigned: bool) -> bool {
        if self_assigned {
            return false;
        }
        self.no_path_routes.remove(&route);
        self.downward_routes.insert(route)
    }

    /// Removes one downward route (a No-Path Target withdrew it). The
    /// removed route is queued so this node in turn announces its own
    /// withdrawal upward in the next regular DAO.
    pub fn downward_route_del(&mut self, route: &Route) -> bool {
        if self.downward_routes.remove(route) {
            self.no_path_routes.insert(route.clone());
            true
        } else {
            false
        }
    }

    /// Removes every downward route reached through `nexthop` (that
    /// neighbor is gone) and queues them for upward No-Path announcement.
    pub fn downward_routes_remove_by_nexthop(&mut self, nexthop: Ipv6Addr) -> Vec<Route> {
        let victims: Vec<Route> = self.downward_routes.iter().filter(|r| r.nexthop == nexthop).cloned().collect();
        for route in &victims {
            self.downward_routes.remove(route);
            self.no_path_routes.insert(route.clone());
        }
        victims
    }

    /// Reduces the currently-known downward routes to at most one winning
    /// candidate per target, and splits the result into the routes that
    /// should be dropped from the global FIB and those that should be
    /// (re-)installed. `rank_of` asks the neighbor cache for a candidate's
    /// next hop's rank; `None` means the next hop is no longer a usable
    /// neighbor, which always loses. Among remaining candidates for the same
    /// target, a one-hop route wins over any multi-hop one, and between two
    /// multi-hop candidates the one with the lower `DAGRank` wins. Grounded
    /// on `dodag.py`'s `get_filtered_downward_routes`.
    pub fn get_filtered_downward_routes(&self, rank_of: impl Fn(&str, Ipv6Addr) -> Option<u16>) -> (Vec<Route>, Vec<Route>) {
        let mut winners: Vec<Route> = Vec::new();
        let mut to_remove: Vec<Route> = Vec::new();

        for route in &self.downward_routes {
            let rank = rank_of(&route.nexthop_iface, route.nexthop);
            let Some(rank) = rank else {
                to_remove.push(route.clone());
                continue;
            };

            match winners.iter().position(|w| w.target == route.target) {
                None => winners.push(route.clone()),
                Some(idx) => {
                    let current = &winners[idx];
                    if current.onehop {
                        // a one-hop route is never displaced.
                        to_remove.push(route.clone());
                    } else if route.onehop {
                        to_remove.push(current.clone());
                        winners[idx] = route.clone();
                    } else {
                        let current_rank = rank_of(&current.nexthop_iface, current.nexthop);
                        let current_dag_rank = current_rank.map(|r| self.dag_rank(r));
                        let candidate_dag_rank = self.dag_rank(rank);
                        if current_dag_rank.map(|c| candidate_dag_rank < c).unwrap_or(true) {
                            to_remove.push(current.clone());
                            winners[idx] = route.clone();
                        } else {
                            to_remove.push(route.clone());
                        }
                    }
                }
            }
        }

        (to_remove, winners)
    }

    pub fn build_dio(&self) -> RplMessage {
        let dio = Dio {
            instance_id: self.instance_id,
            version: self.version,
            rank: self.rank,
            grounded: self.grounded,
            mop: self.mop,
            prf: self.prf,
            dtsn: self.dtsn,
            dodag_id: self.dodag_id,
        };

        let mut options = Vec::new();
        RplOption::DodagConfiguration {
            authenticated: self.authenticated,
            pcs: self.pcs,
            dio_int_doublings: self.dio_int_doublings,
            dio_int_min: self.dio_int_min,
            dio_redundancy_const: self.dio_redundancy_const,
            max_rank_increase: self.max_rank_increase,
            min_hop_rank_increase: self.min_hop_rank_increase,
            ocp: self.ocp,
            default_lifetime: self.default_lifetime,
            lifetime_unit: self.lifetime_unit,
        }
        .encode(&mut options)
        .expect("DodagConfiguration encoding is infallible");

        for prefix in &self.advertised_prefixes {
            RplOption::PrefixInformation {
                prefix_len: 64,
                on_link: false,
                autonomous: true,
                router_address: false,
                valid_lifetime: u32::MAX,
                preferred_lifetime: u32::MAX,
                prefix: *prefix,
            }
            .encode(&mut options)
            .expect("PrefixInformation encoding is infallible");
        }

        RplMessage { body: RplBody::Dio(dio), options }
    }

    /// Builds an upward DAO: a Target/Transit Information group for this
    /// node's own addresses, one for its currently-known downward routes,
    /// and a final no-path group for anything queued in `no_path_routes`.
    /// `retransmit` reuses the last DAO sequence number rather than
    /// incrementing it.
    pub fn build_dao(&mut self, destination: Ipv6Addr, own_targets: &[Ipv6Addr], nopath: bool, retransmit: bool) -> RplMessage {
        if !retransmit {
            self.last_dao_sequence = self.last_dao_sequence.add(1);
        }
        let k = !Address::new(destination).is_all_rpl_nodes();
        let path_lifetime = if nopath { 0x00 } else { self.default_lifetime };

        let mut options = Vec::new();

        if !own_targets.is_empty() {
            for addr in own_targets {
                RplOption::RplTarget { flags: 0, prefix_len: 128, target_prefix: addr.octets().to_vec() }
                    .encode(&mut options)
                    .expect("RplTarget encoding is infallible");
            }
            RplOption::TransitInformation {
                external: false,
                path_control: 0,
                path_sequence: self.last_path_sequence,
                path_lifetime,
                parent_address: None,
            }
            .encode(&mut options)
            .expect("TransitInformation encoding is infallible");
        }

        let mut routes: Vec<&Route> = self.downward_routes.iter().collect();
        routes.sort_by_key(|r| route_sort_key(r));
        if !routes.is_empty() {
            for route in &routes {
                if let RouteTarget::Prefix(addr, prefix_len) = route.target {
                    RplOption::RplTarget { flags: 0, prefix_len, target_prefix: addr.octets().to_vec() }
                        .encode(&mut options)
                        .expect("RplTarget encoding is infallible");
                }
            }
            RplOption::TransitInformation {
                external: false,
                path_control: 0,
                path_sequence: self.last_path_sequence,
                path_lifetime,
                parent_address: None,
            }
            .encode(&mut options)
            .expect("TransitInformation encoding is infallible");
        }

        if !nopath && !self.no_path_routes.is_empty() {
            let mut pending: Vec<Route> = self.no_path_routes.iter().cloned().collect();
            pending.sort_by_key(|r| route_sort_key(r));
            for route in &pending {
                if let RouteTarget::Prefix(addr, prefix_len) = route.target {
                    RplOption::RplTarget { flags: 0, prefix_len, target_prefix: addr.octets().to_vec() }
                        .encode(&mut options)
                        .expect("RplTarget encoding is infallible");
                }
            }
            RplOption::TransitInformation {
                external: false,
                path_control: 0,
                path_sequence: self.last_path_sequence,
                path_lifetime: 0x00,
                parent_address: None,
            }
            .encode(&mut options)
            .expect("TransitInformation encoding is infallible");

            self.no_path_routes_trans += 1;
            if self.no_path_routes_trans >= DEFAULT_DAO_NO_PATH_TRANS {
                self.no_path_routes.clear();
                self.no_path_routes_trans = 0;
            }
        }

        let dao = Dao { instance_id: self.instance_id, k, d: true, dao_sequence: self.last_dao_sequence, dodag_id: Some(self.dodag_id) };
        RplMessage { body: RplBody::Dao(dao), options }
    }

    pub fn build_dao_ack(&self, dao_sequence: u8) -> RplMessage {
        let ack = DaoAck { instance_id: self.instance_id, d: true, dao_sequence, status: 0, dodag_id: Some(self.dodag_id) };
        RplMessage { body: RplBody::DaoAck(ack), options: Vec::new() }
    }
}

fn route_sort_key(route: &Route) -> Vec<u8> {
    match route.target {
        RouteTarget::Default => Vec::new(),
        RouteTarget::Prefix(addr, len) => {
            let mut key = addr.octets().to_vec();
            key.push(len);
            key
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_rank_is_fixed() {
        let d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        assert_eq!(d.rank, ROOT_RANK);
        assert!(d.grounded);
        assert!(d.is_root);
        assert!(d.active);
    }

    #[test]
    fn learned_dodag_starts_at_infinite_rank_and_inactive() {
        let d = Dodag::new_learned(0, Lollipop::new(240).unwrap(), true, 2, 0, Lollipop::default(), "2001:db8::1".parse().unwrap());
        assert_eq!(d.rank, INFINITE_RANK);
        assert!(!d.active);
        assert!(d.preferred_parent.is_none());
    }

    #[test]
    fn compute_rank_increase_adds_three_hops_worth() {
        let d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        assert_eq!(d.compute_rank_increase(256), 256 + 3 * 256);
    }

    #[test]
    fn compute_rank_increase_caps_at_infinite() {
        let d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        assert_eq!(d.compute_rank_increase(INFINITE_RANK - 1), INFINITE_RANK);
    }

    #[test]
    fn dag_rank_divides_by_min_hop_rank_increase() {
        let d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        assert_eq!(d.dag_rank(1024), 4);
    }

    #[test]
    fn poisoning_sets_infinite_rank() {
        let mut d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        d.poison();
        assert_eq!(d.rank, INFINITE_RANK);
    }

    /// spec.md §8 "Route reconciliation": a one-hop candidate always beats a
    /// multi-hop one for the same target, regardless of rank.
    #[test]
    fn filtered_downward_routes_prefer_onehop_over_multihop() {
        let mut d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        let target = RouteTarget::Prefix("2001:db8::42".parse().unwrap(), 128);
        let onehop = Route { target: target.clone(), nexthop: "fe80::1".parse().unwrap(), nexthop_iface: "eth0".into(), onehop: true };
        let multihop = Route { target: target.clone(), nexthop: "fe80::2".parse().unwrap(), nexthop_iface: "eth0".into(), onehop: false };
        d.downward_routes.insert(onehop.clone());
        d.downward_routes.insert(multihop.clone());

        let (removed, kept) = d.get_filtered_downward_routes(|_, _| Some(512));
        assert_eq!(kept, vec![onehop]);
        assert_eq!(removed, vec![multihop]);
    }

    /// Between two multi-hop candidates for the same target, the one whose
    /// next hop has the lower DAGRank wins.
    #[test]
    fn filtered_downward_routes_prefer_lower_dag_rank_among_multihop() {
        let mut d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        let target = RouteTarget::Prefix("2001:db8::42".parse().unwrap(), 128);
        let closer = Route { target: target.clone(), nexthop: "fe80::1".parse().unwrap(), nexthop_iface: "eth0".into(), onehop: false };
        let farther = Route { target: target.clone(), nexthop: "fe80::2".parse().unwrap(), nexthop_iface: "eth0".into(), onehop: false };
        d.downward_routes.insert(closer.clone());
        d.downward_routes.insert(farther.clone());

        let (removed, kept) =
            d.get_filtered_downward_routes(|_, addr| if addr == closer.nexthop { Some(512) } else { Some(1024) });
        assert_eq!(kept, vec![closer]);
        assert_eq!(removed, vec![farther]);
    }

    /// A candidate whose next hop is no longer a usable neighbor always
    /// loses, even if it was the sole candidate for its target.
    #[test]
    fn filtered_downward_routes_drop_routes_through_vanished_neighbors() {
        let mut d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        let route = Route {
            target: RouteTarget::Prefix("2001:db8::42".parse().unwrap(), 128),
            nexthop: "fe80::1".parse().unwrap(),
            nexthop_iface: "eth0".into(),
            onehop: false,
        };
        d.downward_routes.insert(route.clone());
        let (removed, kept) = d.get_filtered_downward_routes(|_, _| None);
        assert!(kept.is_empty());
        assert_eq!(removed, vec![route]);
    }

    #[test]
    fn downward_route_add_rejects_self_assigned_targets() {
        let mut d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        let route = Route {
            target: RouteTarget::Prefix("2001:db8::42".parse().unwrap(), 128),
            nexthop: "fe80::1".parse().unwrap(),
            nexthop_iface: "eth0".into(),
            onehop: true,
        };
        assert!(!d.downward_route_add(route.clone(), true));
        assert!(d.downward_routes.is_empty());
        assert!(d.downward_route_add(route, false));
        assert_eq!(d.downward_routes.len(), 1);
    }

    #[test]
    fn deleting_a_downward_route_queues_it_for_no_path_withdrawal() {
        let mut d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        let route = Route {
            target: RouteTarget::Prefix("2001:db8::42".parse().unwrap(), 128),
            nexthop: "fe80::1".parse().unwrap(),
            nexthop_iface: "eth0".into(),
            onehop: true,
        };
        d.downward_route_add(route.clone(), false);
        assert!(d.downward_route_del(&route));
        assert!(d.downward_routes.is_empty());
        assert!(d.no_path_routes.contains(&route));
    }

    #[test]
    fn build_dao_includes_own_targets_and_downward_routes() {
        let mut d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        let route = Route {
            target: RouteTarget::Prefix("2001:db8::42".parse().unwrap(), 128),
            nexthop: "fe80::1".parse().unwrap(),
            nexthop_iface: "eth0".into(),
            onehop: true,
        };
        d.downward_route_add(route, false);
        let own = ["2001:db8::1".parse().unwrap()];
        let msg = d.build_dao("fe80::2".parse().unwrap(), &own, false, false);
        let options = rpl_wire::option::get_all_options(&msg.options).unwrap();
        let target_count = options.iter().filter(|o| matches!(o, RplOption::RplTarget { .. })).count();
        assert_eq!(target_count, 2);
        match msg.body {
            RplBody::Dao(dao) => {
                assert!(dao.k);
                assert!(dao.d);
            }
            _ => panic!("expected a DAO"),
        }
    }

    #[test]
    fn build_dao_to_all_rpl_nodes_clears_the_k_flag() {
        let mut d = Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![]);
        let msg = d.build_dao(rpl_common::constants::ALL_RPL_NODES, &[], true, false);
        match msg.body {
            RplBody::Dao(dao) => assert!(!dao.k),
            _ => panic!("expected a DAO"),
        }
    }
}
