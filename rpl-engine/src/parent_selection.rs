//! DIO parent selection and the single globally-preferred parent.
//!
//! Grounded on `original_source/RPL/neighbor_cache.py`'s
//! `compute_DIO_parents`/`rank_increase_is_legit`/`set_preferred`/
//! `update_DIO_parent`. The Python version reaches directly into
//! `gv.dodag_cache`/`gv.route_cache` from inside these methods, which is
//! exactly the cyclic-object-graph pattern `rpl-neighbor`'s module doc
//! explains is deliberately not reproduced there; this is the one place
//! (the engine) that is allowed to see every cache at once, so it is where
//! that orchestration lives instead.

use crate::engine::Engine;
use rpl_dodag::{DodagHandle, compare_parents};
use rpl_neighbor::NodeHandle;
use rpl_route::{Route, RouteTarget};
use std::cmp::Ordering;

impl Engine {
    fn compute_dio_parents(&self, handle: DodagHandle) -> Vec<NodeHandle> {
        let Some(dodag) = self.dodags.get(handle) else { return Vec::new() };
        self.neighbors
            .neighbors_for_dodag(handle)
            .into_iter()
            .filter(|&nh| {
                self.neighbors
                    .node(nh)
                    .map(|n| dodag.dag_rank(dodag.rank) > dodag.dag_rank(n.rank))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn rank_increase_is_legit(&self, handle: DodagHandle, node: NodeHandle) -> bool {
        let Some(dodag) = self.dodags.get(handle) else { return false };
        let Some(n) = self.neighbors.node(node) else { return false };
        if dodag.max_rank_increase == 0 {
            return true;
        }
        let rank = dodag.compute_rank_increase(n.rank);
        if rank as u32 > dodag.lowest_rank_advertized as u32 + dodag.max_rank_increase as u32 {
            tracing::debug!(rank, lowest = dodag.lowest_rank_advertized, "rank increase exceeds MaxRankIncrease, rejecting candidate");
            return false;
        }
        true
    }

    /// Builds a `RankCandidate` from a neighbor's own DODAG, so the same
    /// comparator can sort both "parents of one DODAG" and "one chosen
    /// parent per DODAG" lists.
    fn compare_candidates(&self, a: NodeHandle, b: NodeHandle) -> Ordering {
        let candidate = |h: NodeHandle| {
            let node = self.neighbors.node(h)?;
            let dodag = self.dodags.get(node.dodag)?;
            let preferred = self.neighbors.preferred() == Some(h);
            Some(dodag.to_rank_candidate(node.rank, preferred))
        };
        match (candidate(a), candidate(b)) {
            (Some(ca), Some(cb)) => compare_parents(&ca, &cb).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        }
    }

    /// `set_preferred([])`: drop the preferred parent entirely, withdrawing
    /// its default route. Always completes.
    fn clear_preferred(&mut self) -> bool {
        if let Some(old) = self.neighbors.preferred() {
            if let Some(node) = self.neighbors.node(old).cloned() {
                let route =
                    Route { target: RouteTarget::Default, nexthop: node.address.inner(), nexthop_iface: node.iface, onehop: true };
                self.routes.remove_route(&route);
            }
            if let Some(n) = self.neighbors.node_mut(old) {
                n.preferred = false;
            }
            self.neighbors.set_preferred(None);
        }
        true
    }

    /// `neighbor_cache.py`'s `set_preferred`. Returns `false` when the
    /// candidate had to be poisoned out of its own DODAG (a tie with the
    /// current preferred parent broken in the candidate's favor inside the
    /// same DODAG); the caller is expected to drop the head of its
    /// candidate list and retry.
    fn set_preferred(&mut self, parents: &[NodeHandle]) -> bool {
        let Some(&candidate) = parents.first() else {
            return self.clear_preferred();
        };

        let current = self.neighbors.preferred();
        if current == Some(candidate) {
            return true;
        }

        let Some(new_node) = self.neighbors.node(candidate).cloned() else { return true };

        let mut reset_needed = current.is_none();

        if let Some(old) = current {
            let Some(old_node) = self.neighbors.node(old).cloned() else { return true };

            let old_route = Route {
                target: RouteTarget::Default,
                nexthop: old_node.address.inner(),
                nexthop_iface: old_node.iface.clone(),
                onehop: true,
            };
            self.routes.remove_route(&old_route);
            if let Some(n) = self.neighbors.node_mut(old) {
                n.preferred = false;
            }

            if new_node.dodag != old_node.dodag {
                let old_routes = self.dodags.get(old_node.dodag).map(|d| d.downward_routes.clone()).unwrap_or_default();
                let new_routes = self.dodags.get(new_node.dodag).map(|d| d.downward_routes.clone()).unwrap_or_default();
                let to_remove: Vec<Route> = old_routes.difference(&new_routes).cloned().collect();
                let to_add: Vec<Route> = new_routes.difference(&old_routes).cloned().collect();
                self.routes.remove_routes(to_remove.iter());
                self.routes.add_routes(to_add);
                reset_needed = true;
            } else {
                let old_dag_rank = self.dodags.get(old_node.dodag).map(|d| d.dag_rank(old_node.rank)).unwrap_or(0);
                let new_dag_rank = self.dodags.get(new_node.dodag).map(|d| d.dag_rank(new_node.rank)).unwrap_or(0);
                if new_dag_rank > old_dag_rank {
                    if let Some(d) = self.dodags.get_mut(old_node.dodag) {
                        d.poison();
                    }
                    self.neighbors.set_preferred(None);
                    return false;
                }
            }
        }

        if let Some(active) = self.dodags.get_active_dodag() {
            if active != new_node.dodag {
                if let Some(d) = self.dodags.get_mut(active) {
                    d.active = false;
                }
            }
        }

        if let Some(n) = self.neighbors.node_mut(candidate) {
            n.preferred = true;
        }
        if let Some(d) = self.dodags.get_mut(new_node.dodag) {
            d.active = true;
        }

        if reset_needed {
            self.reset_trickle(new_node.dodag);
        }

        self.neighbors.set_preferred(Some(candidate));
        let route = Route {
            target: RouteTarget::Default,
            nexthop: new_node.address.inner(),
            nexthop_iface: new_node.iface,
            onehop: true,
        };
        self.routes.add_route(route);

        true
    }

    /// `neighbor_cache.py`'s `update_DIO_parent`. Recomputes each tracked
    /// DODAG's preferred parent, then the single globally preferred parent
    /// across all of them, bumping the active DODAG's rank if the new
    /// parent improves it. Returns whether the DIO parent set changed in a
    /// way that warrants a trickle reset.
    pub(crate) fn update_dio_parent(&mut self) -> bool {
        let old_pref_parent = self.neighbors.preferred();
        self.neighbors.set_parents(Vec::new());

        let dodag_handles: Vec<DodagHandle> = self.dodags.iter().map(|(h, _)| h).collect();
        let mut all_parents: Vec<NodeHandle> = Vec::new();

        for &handle in &dodag_handles {
            let mut candidates = self.compute_dio_parents(handle);
            all_parents.extend(candidates.iter().copied());
            candidates.sort_by(|&a, &b| self.compare_candidates(a, b));

            let chosen = candidates.into_iter().find(|&nh| self.rank_increase_is_legit(handle, nh));
            if let Some(d) = self.dodags.get_mut(handle) {
                d.preferred_parent = chosen;
            }
        }
        self.neighbors.set_parents(all_parents);

        let mut parents: Vec<NodeHandle> =
            dodag_handles.iter().filter_map(|&h| self.dodags.get(h).and_then(|d| d.preferred_parent)).collect();
        parents.sort_by(|&a, &b| self.compare_candidates(a, b));

        let mut completed = self.set_preferred(&parents);
        while !completed {
            if !parents.is_empty() {
                parents.remove(0);
            }
            completed = self.set_preferred(&parents);
        }

        match self.neighbors.preferred() {
            Some(pref) => {
                let Some(node) = self.neighbors.node(pref).cloned() else { return false };
                let Some(dodag) = self.dodags.get_mut(node.dodag) else { return false };
                let old_rank = dodag.rank;
                dodag.rank = dodag.compute_rank_increase(node.rank);
                if old_rank > dodag.rank {
                    dodag.dio_timer.hear_inconsistent();
                    true
                } else {
                    false
                }
            }
            None => {
                tracing::debug!("DIO parent set is empty");
                old_pref_parent != self.neighbors.preferred()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryAddressAdapter, NoopLinkAdapter, NoopLinkSender};
    use crate::engine::EngineConfig;
    use rpl_common::{Address, Lollipop};
    use rpl_dodag::Dodag;

    fn learner_engine() -> Engine {
        Engine::new(
            EngineConfig { ifaces: vec!["eth0".into()], is_root: false, dodag_ids: vec![], prefixes: vec![] },
            Box::new(InMemoryAddressAdapter::new()),
            Box::new(NoopLinkAdapter),
            Box::new(NoopLinkSender),
        )
    }

    /// Two candidate parents in the same DODAG: OF0 must settle on exactly
    /// one preferred neighbor (the lower-rank one) and recompute this
    /// node's own rank from it.
    #[test]
    fn picks_the_lower_rank_candidate_as_the_single_preferred_parent() {
        let mut engine = learner_engine();
        let dodag = Dodag::new_learned(
            0,
            Lollipop::new(240).unwrap(),
            true,
            2,
            0,
            Lollipop::default(),
            "2001:db8::1".parse().unwrap(),
        );
        let handle = engine.dodags.add(dodag).unwrap();

        engine.neighbors.register_node("eth0", Address::new("fe80::2".parse().unwrap()), handle, 256, Lollipop::default());
        engine.neighbors.register_node("eth0", Address::new("fe80::3".parse().unwrap()), handle, 512, Lollipop::default());

        engine.update_dio_parent();

        let preferred_count = engine.neighbors.iter().filter(|(_, n)| n.preferred).count();
        assert_eq!(preferred_count, 1, "at most one neighbor may be preferred at a time");

        let pref = engine.neighbors.node(engine.neighbors.preferred().unwrap()).unwrap();
        assert_eq!(pref.address.to_string(), "fe80::2");
        assert_eq!(engine.dodags.get(handle).unwrap().rank, 1024);
    }

    #[test]
    fn empty_dodag_cache_leaves_no_preferred_parent() {
        let mut engine = learner_engine();
        assert!(!engine.update_dio_parent());
        assert!(engine.neighbors.preferred().is_none());
    }
}
