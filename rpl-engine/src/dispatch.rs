//! DIS/DIO/DAO/DAO-ACK message dispatch. Grounded on
//! `original_source/RPL/core.py`'s `process_loop`/`handleMessage` and the
//! per-code handler methods it calls out to, restructured into an
//! exhaustive match on `RplBody` instead of a runtime lookup by class name.

use crate::engine::{Engine, Frame};
use rpl_common::constants::INFINITE_RANK;
use rpl_common::Address;
use rpl_dodag::{Dodag, DodagHandle};
use rpl_route::{Route, RouteTarget};
use rpl_wire::option::{self, OPT_SOLICITED_INFORMATION};
use rpl_wire::{Dao, DaoAck, Dio, Dis, RplBody, RplMessage, RplOption};
use std::cmp::Ordering;
use std::net::Ipv6Addr;
use tracing::{debug, info, warn};

impl Engine {
    /// Entry point for every inbound wire frame. Drops any message whose
    /// source is one of this node's own assigned addresses (a frame that
    /// bounced back, e.g. over a shared medium) before decoding, then
    /// dispatches by RPL code.
    pub(crate) fn handle_frame(&mut self, frame: Frame) {
        if self.address_adapter.is_assigned(&frame.src) {
            debug!(src = %frame.src, "dropping frame that echoes our own address");
            return;
        }

        let msg = match RplMessage::decode(&frame.data) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, iface = %frame.iface, "failed to decode inbound RPL message, dropping");
                return;
            }
        };

        match msg.body {
            RplBody::Dis(dis) => self.handle_dis(&frame, dis, &msg.options),
            RplBody::Dio(dio) => self.handle_dio(&frame, dio, &msg.options),
            RplBody::Dao(dao) => self.handle_dao(&frame, dao, &msg.options),
            RplBody::DaoAck(ack) => self.handle_dao_ack(&frame, ack, &msg.options),
            RplBody::Cc(_) => debug!("Consistency Check processing beyond the codec is out of scope, dropping"),
        }
    }

    // ---- DIS ----------------------------------------------------------------

    fn handle_dis(&mut self, frame: &Frame, _dis: Dis, options: &[u8]) {
        if self.dodags.is_empty() {
            debug!("node participates in no DODAG, dropping DIS");
            return;
        }

        let is_multicast = Address::new(frame.dst).is_all_rpl_nodes();
        if is_multicast {
            let handles: Vec<DodagHandle> = self.dodags.iter().map(|(h, _)| h).collect();
            for h in handles {
                self.reset_trickle(h);
            }
            return;
        }

        match option::find_option(options, OPT_SOLICITED_INFORMATION, 0) {
            Ok(Some(RplOption::SolicitedInformation {
                instance_id,
                version_predicate,
                instance_predicate,
                dodag_predicate,
                dodag_id,
                version,
            })) => {
                let handles: Vec<DodagHandle> = self
                    .dodags
                    .iter()
                    .filter(|(_, d)| {
                        (!instance_predicate || d.instance_id == instance_id)
                            && (!dodag_predicate || d.dodag_id == dodag_id)
                            && (!version_predicate || d.version == version)
                    })
                    .map(|(h, _)| h)
                    .collect();
                for h in handles {
                    self.send_dio(h, Some(&frame.iface), Some(frame.src), false);
                }
            }
            Ok(None) => {
                if let Some(active) = self.dodags.get_active_dodag() {
                    self.send_dio(active, Some(&frame.iface), Some(frame.src), false);
                }
            }
            Ok(Some(_)) => unreachable!("find_option only returns the requested option type"),
            Err(e) => warn!(error = %e, "failed to parse DIS options, dropping"),
        }
    }

    // ---- DIO ------------------------------------------------------------------

    fn handle_dio(&mut self, frame: &Frame, dio: Dio, options: &[u8]) {
        let src_addr = Address::new(frame.src);
        if !src_addr.is_link_local() {
            debug!(src = %frame.src, "DIO source is not link-local, dropping");
            return;
        }

        match self.global_instance_id {
            None => {
                self.global_instance_id = Some(dio.instance_id);
                info!(instance_id = dio.instance_id, "attached to RPL instance");
            }
            Some(id) if id != dio.instance_id => {
                debug!(dio_instance = dio.instance_id, our_instance = id, "DIO from a different RPL instance, dropping");
                return;
            }
            _ => {}
        }

        let Some(handle) = self.resolve_dio_dodag(&dio) else { return };

        let existing_node = self.neighbors.get_node(&frame.iface, &src_addr, handle);
        let old_dtsn = existing_node.and_then(|n| self.neighbors.node(n)).map(|n| n.dtsn);
        let was_parent = existing_node.map(|n| self.neighbors.is_parent(n)).unwrap_or(false);

        if let Some(d) = self.dodags.get_mut(handle) {
            d.prf = dio.prf;
            d.dtsn = dio.dtsn;
            d.note_dio_received();
        }

        let mut inconsistent = false;

        if dio.rank == INFINITE_RANK {
            if existing_node.is_some() {
                self.remove_neighbor_by_address(handle, &src_addr);
                inconsistent = true;
            }
        } else {
            if was_parent {
                if let Some(old) = old_dtsn {
                    if dio.dtsn.rpl_cmp(old) == Ordering::Greater {
                        let withdrawn = self.dodags.get_mut(handle).map(|d| d.downward_routes_reset()).unwrap_or_default();
                        if !withdrawn.is_empty() {
                            self.routes.remove_routes(withdrawn.iter());
                        }
                        self.arm_dao_delay(handle);
                        inconsistent = true;
                    }
                }
            }

            let opts = match option::get_all_options(options) {
                Ok(o) => o,
                Err(e) => {
                    warn!(error = %e, "failed to parse DIO options, dropping");
                    return;
                }
            };

            for opt in &opts {
                match opt {
                    RplOption::DodagConfiguration {
                        authenticated,
                        pcs,
                        dio_int_doublings,
                        dio_int_min,
                        dio_redundancy_const,
                        max_rank_increase,
                        min_hop_rank_increase,
                        ocp,
                        default_lifetime,
                        lifetime_unit,
                    } => {
                        if let Some(d) = self.dodags.get_mut(handle) {
                            d.apply_configuration(
                                *authenticated,
                                *pcs,
                                *dio_int_doublings,
                                *dio_int_min,
                                *dio_redundancy_const,
                                *max_rank_increase,
                                *min_hop_rank_increase,
                                *ocp,
                                *default_lifetime,
                                *lifetime_unit,
                            );
                        }
                    }
                    RplOption::PrefixInformation { prefix_len, autonomous, on_link, prefix, .. } => {
                        if *autonomous && !*on_link && *prefix_len == 64 {
                            if let Some(lladdr) = self.link_adapter.hardware_address(&frame.iface) {
                                match rpl_common::address::derive_address(prefix, &lladdr) {
                                    Ok(addr) => {
                                        self.address_adapter.assign(&frame.iface, addr, *prefix_len, u32::MAX, u32::MAX);
                                    }
                                    Err(e) => warn!(error = %e, "failed to derive SLAAC address from Prefix Information"),
                                }
                            }
                            if let Some(d) = self.dodags.get_mut(handle) {
                                if !d.advertised_prefixes.contains(prefix) {
                                    d.advertised_prefixes.push(*prefix);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }

            self.neighbors.register_node(&frame.iface, src_addr, handle, dio.rank, dio.dtsn);
        }

        let rank_changed = self.update_dio_parent();
        inconsistent |= rank_changed;

        if let Some(d) = self.dodags.get_mut(handle) {
            if d.preferred_parent.is_none() {
                d.rank = INFINITE_RANK;
            }
        }

        let stale: Vec<DodagHandle> = self.dodags.purge_old_versions();
        for h in stale {
            self.poison_dodag(h, false);
        }

        if inconsistent {
            self.reset_trickle(handle);
            self.arm_dao_delay(handle);
        } else if let Some(d) = self.dodags.get_mut(handle) {
            d.dio_timer.hear_consistent();
        }

        for (_, d) in self.dodags.iter_mut() {
            if d.rank < d.lowest_rank_advertized {
                d.lowest_rank_advertized = d.rank;
            }
        }
    }

    /// Resolve which DODAG a DIO's `(dodagID, version, instanceID)` refers
    /// to: an exact match is reused (unless it is our
    /// own root DODAG, or the MOP changed, both of which drop); an unknown
    /// `dodagID` is accepted as a brand-new DODAG if grounded/finite
    /// rank/MOP==2; a `dodagID` with older versions already known accepts a
    /// strictly newer version as a global repair (inheriting DAO/Path
    /// sequence numbers from the most recent known version) and drops
    /// anything not newer than our most recent or older than our least
    /// recent known version.
    fn resolve_dio_dodag(&mut self, dio: &Dio) -> Option<DodagHandle> {
        let exact = self.dodags.get_dodag(Some(dio.dodag_id), Some(dio.version), Some(dio.instance_id));
        if let Some(&h) = exact.first() {
            let is_root = self.dodags.get(h).map(|d| d.is_root).unwrap_or(false);
            if is_root {
                debug!("DIO echoes our own root DODAG, dropping");
                return None;
            }
            let mop_changed = self.dodags.get(h).map(|d| d.mop != dio.mop).unwrap_or(false);
            if mop_changed {
                warn!("MOP change on an existing DODAG is unsupported, dropping");
                return None;
            }
            return Some(h);
        }

        let known = self.dodags.get_dodag(Some(dio.dodag_id), None, Some(dio.instance_id));
        if known.is_empty() {
            if !dio.grounded || dio.rank == INFINITE_RANK || dio.mop != 2 {
                debug!("unacceptable new DODAG (not grounded, infinite rank, or MOP != 2), dropping");
                return None;
            }
            let new_dodag = Dodag::new_learned(dio.instance_id, dio.version, dio.grounded, dio.mop, dio.prf, dio.dtsn, dio.dodag_id);
            return self.insert_learned_dodag(new_dodag, dio.dodag_id, dio.version, false);
        }

        let mut newest = known[0];
        let mut oldest = known[0];
        for &h in &known[1..] {
            let Some(d) = self.dodags.get(h) else { continue };
            if self.dodags.get(newest).map(|n| d.version.rpl_cmp(n.version) == Ordering::Greater).unwrap_or(false) {
                newest = h;
            }
            if self.dodags.get(oldest).map(|o| d.version.rpl_cmp(o.version) == Ordering::Less).unwrap_or(false) {
                oldest = h;
            }
        }

        let newest_version = self.dodags.get(newest).map(|d| d.version);
        let oldest_version = self.dodags.get(oldest).map(|d| d.version);

        let is_newer = newest_version.map(|v| dio.version.rpl_cmp(v) == Ordering::Greater).unwrap_or(false);
        let is_older_than_oldest = oldest_version.map(|v| dio.version.rpl_cmp(v) == Ordering::Less).unwrap_or(false);

        if is_older_than_oldest {
            debug!("DIO version older than our least-recent known version, dropping");
            return None;
        }
        if !is_newer {
            debug!("DIO version is not a recognized newer version, dropping");
            return None;
        }
        if !dio.grounded || dio.rank == INFINITE_RANK || dio.mop != 2 {
            debug!("new DODAG version is not acceptable (not grounded, infinite rank, or MOP != 2), dropping");
            return None;
        }

        let (inherit_dao_seq, inherit_path_seq) =
            self.dodags.get(newest).map(|d| (d.last_dao_sequence, d.last_path_sequence)).unwrap_or_default();

        let mut new_dodag = Dodag::new_learned(dio.instance_id, dio.version, dio.grounded, dio.mop, dio.prf, dio.dtsn, dio.dodag_id);
        new_dodag.last_dao_sequence = inherit_dao_seq;
        new_dodag.last_path_sequence = inherit_path_seq;
        self.insert_learned_dodag(new_dodag, dio.dodag_id, dio.version, true)
    }

    fn insert_learned_dodag(&mut self, dodag: Dodag, dodag_id: Ipv6Addr, version: rpl_common::Lollipop, is_repair: bool) -> Option<DodagHandle> {
        match self.dodags.add(dodag) {
            Ok(h) => {
                if is_repair {
                    info!(%dodag_id, %version, "accepted new DODAG version (global repair)");
                } else {
                    info!(%dodag_id, %version, "learned a new DODAG");
                }
                self.start_trickle(h);
                Some(h)
            }
            Err(e) => {
                warn!(error = %e, %dodag_id, "could not add DODAG to cache");
                None
            }
        }
    }

    // ---- DAO ------------------------------------------------------------------

    fn handle_dao(&mut self, frame: &Frame, dao: Dao, options: &[u8]) {
        let dst_is_mine = self.address_adapter.is_assigned(&frame.dst);
        let dst_is_multicast = Address::new(frame.dst).is_all_rpl_nodes();
        if !dst_is_mine && !dst_is_multicast {
            debug!(dst = %frame.dst, "DAO destination is neither ours nor all-RPL-nodes, dropping");
            return;
        }

        let Some(active) = self.dodags.get_active_dodag() else {
            debug!("node belongs to no DODAG, dropping DAO");
            return;
        };
        let instance_id = self.dodags.get(active).map(|d| d.instance_id);
        if instance_id != Some(dao.instance_id) {
            debug!("DAO instanceID mismatch, dropping");
            return;
        }

        if dst_is_multicast && dao.k {
            debug!("multicast DAO with K=1 is invalid, dropping");
            return;
        }

        if dao.d {
            let dodag_id = self.dodags.get(active).map(|d| d.dodag_id);
            if dao.dodag_id != dodag_id {
                debug!("DAO DODAGID does not match the active DODAG, dropping");
                return;
            }
        }

        let opts = match option::get_all_options(options) {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, "failed to parse DAO options, dropping");
                return;
            }
        };

        let mut route_updated = false;
        let mut pending_targets: Vec<(Ipv6Addr, u8)> = Vec::new();

        for opt in &opts {
            match opt {
                RplOption::RplTarget { prefix_len, target_prefix, .. } => {
                    if target_prefix.len() != 16 {
                        warn!(len = target_prefix.len(), "RPL Target option with unexpected prefix length, dropping DAO");
                        return;
                    }
                    let mut raw = [0u8; 16];
                    raw.copy_from_slice(target_prefix);
                    pending_targets.push((Ipv6Addr::from(raw), *prefix_len));
                }
                RplOption::TransitInformation { external, path_control, path_lifetime, .. } => {
                    if *external || *path_control != 0 {
                        debug!("unsupported Transit Information (E=1 or nonzero Path Control), dropping DAO");
                        return;
                    }
                    if *path_lifetime != 0x00 && *path_lifetime != 0xff {
                        debug!(path_lifetime, "unsupported path lifetime, dropping DAO");
                        return;
                    }

                    let no_path = *path_lifetime == 0x00;
                    for (addr, len) in pending_targets.drain(..) {
                        let route = Route {
                            target: RouteTarget::Prefix(addr, len),
                            nexthop: frame.src,
                            nexthop_iface: frame.iface.clone(),
                            // matches `core.py`'s `handleDAO`: onehop tracks
                            // whether this DAO itself arrived multicast, not
                            // whether the target is topologically adjacent.
                            onehop: dst_is_multicast,
                        };
                        if no_path {
                            let removed = self.dodags.get_mut(active).map(|d| d.downward_route_del(&route)).unwrap_or(false);
                            if removed {
                                route_updated = true;
                                self.routes.remove_route(&route);
                            }
                        } else {
                            let assigned = self.address_adapter.assigned_addresses();
                            let self_assigned = rpl_route::target_is_self_assigned(&route.target, &assigned);
                            let added =
                                self.dodags.get_mut(active).map(|d| d.downward_route_add(route, self_assigned)).unwrap_or(false);
                            if added {
                                route_updated = true;
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if route_updated {
            let filtered = self.dodags.get(active).map(|d| {
                d.get_filtered_downward_routes(|iface, addr| {
                    self.neighbors
                        .neighbors_for_dodag(active)
                        .into_iter()
                        .filter_map(|nh| self.neighbors.node(nh))
                        .find(|n| n.iface == iface && n.address.inner() == addr)
                        .map(|n| n.rank)
                })
            });
            if let Some((to_remove, to_keep)) = filtered {
                self.routes.remove_routes(to_remove.iter());
                self.routes.add_routes(to_keep);
            }

            if let Some(d) = self.dodags.get_mut(active) {
                d.last_path_sequence = d.last_path_sequence.add(1);
            }
            let is_root = self.dodags.get(active).map(|d| d.is_root).unwrap_or(false);
            if !is_root {
                self.arm_dao_delay(active);
            }
        }

        if dao.k {
            self.send_dao_ack(active, &frame.iface, frame.src, dao.dao_sequence.value());
        }
    }

    fn send_dao_ack(&mut self, handle: DodagHandle, iface: &str, dest: Ipv6Addr, dao_sequence: u8) {
        let Some(dodag) = self.dodags.get(handle) else { return };
        let msg = dodag.build_dao_ack(dao_sequence);
        let Ok(encoded) = msg.encode() else {
            warn!("failed to encode DAO-ACK, dropping");
            return;
        };
        self.link_sender.send(iface, dest, &encoded);
    }

    // ---- DAO-ACK --------------------------------------------------------------

    fn handle_dao_ack(&mut self, frame: &Frame, ack: DaoAck, options: &[u8]) {
        if !options.is_empty() {
            debug!("DAO-ACK carries trailing option bytes, dropping");
            return;
        }

        match self.global_instance_id {
            Some(id) if id == ack.instance_id => {}
            _ => {
                debug!("DAO-ACK from an unrecognized RPL instance, dropping");
                return;
            }
        }

        let handle = if ack.d {
            let Some(dodag_id) = ack.dodag_id else {
                debug!("DAO-ACK sets D but carries no DODAGID, dropping");
                return;
            };
            match self.dodags.get_dodag(Some(dodag_id), None, Some(ack.instance_id)).first().copied() {
                Some(h) => h,
                None => {
                    debug!("DAO-ACK DODAGID does not match any known DODAG, dropping");
                    return;
                }
            }
        } else {
            match self.dodags.get_active_dodag() {
                Some(h) => h,
                None => {
                    debug!("no active DODAG, dropping DAO-ACK");
                    return;
                }
            }
        };

        self.on_dao_ack_received(handle, frame.src, ack.dao_sequence, ack.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FixedLinkAdapter, InMemoryAddressAdapter, NoopLinkAdapter, NoopLinkSender};
    use crate::engine::EngineConfig;
    use rpl_common::Lollipop;

    fn learner_engine() -> Engine {
        Engine::new(
            EngineConfig { ifaces: vec!["eth0".into()], is_root: false, dodag_ids: vec![], prefixes: vec![] },
            Box::new(InMemoryAddressAdapter::new()),
            Box::new(FixedLinkAdapter([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])),
            Box::new(NoopLinkSender),
        )
    }

    fn root_engine() -> Engine {
        Engine::new(
            EngineConfig { ifaces: vec!["eth0".into()], is_root: true, dodag_ids: vec!["2001:db8::1".parse().unwrap()], prefixes: vec![] },
            Box::new(InMemoryAddressAdapter::new()),
            Box::new(NoopLinkAdapter),
            Box::new(NoopLinkSender),
        )
    }

    fn dio_frame(dtsn: u8, src: &str) -> Frame {
        let dio = Dio {
            instance_id: 0,
            version: Lollipop::new(240).unwrap(),
            rank: 256,
            grounded: true,
            mop: 2,
            prf: 0,
            dtsn: Lollipop::new(dtsn).unwrap(),
            dodag_id: "2001:db8::1".parse().unwrap(),
        };
        let mut options = Vec::new();
        RplOption::PrefixInformation {
            prefix_len: 64,
            on_link: false,
            autonomous: true,
            router_address: false,
            valid_lifetime: u32::MAX,
            preferred_lifetime: u32::MAX,
            prefix: "2001:db8::".parse().unwrap(),
        }
        .encode(&mut options)
        .unwrap();
        let data = RplMessage { body: RplBody::Dio(dio), options }.encode().unwrap();
        Frame { iface: "eth0".into(), src: src.parse().unwrap(), dst: rpl_common::constants::ALL_RPL_NODES, data }
    }

    /// spec.md §8 scenario 2: a learner hears a grounded DIO advertising a
    /// Prefix Information option and joins the DODAG.
    #[test]
    fn join_grounded_dodag_assigns_address_and_updates_rank() {
        let mut engine = learner_engine();
        engine.handle_frame(dio_frame(240, "fe80::2"));

        let active = engine.dodags.get_active_dodag().expect("should have joined a DODAG");
        let dodag = engine.dodags.get(active).unwrap();
        assert!(dodag.active);
        assert_eq!(dodag.rank, 1024); // 256 (parent rank) + (3*1+0)*256 (OF0 increase)

        let assigned = engine.address_adapter.assigned_addresses();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].to_string(), "2001:db8::211:22ff:fe33:4455");

        let nexthop = engine.routes.lookup_nexthop(&RouteTarget::Default);
        assert_eq!(nexthop, Some("fe80::2".parse().unwrap()));

        assert!(engine.timers.next_deadline().is_some(), "DAO-delay timer should be armed");
    }

    /// spec.md §8 scenario 3: the preferred parent re-advertises a higher
    /// DTSN, which must withdraw every downward route learned through it and
    /// arm a fresh DAO delay so they get relearned.
    #[test]
    fn parent_dtsn_bump_clears_downward_routes() {
        let mut engine = learner_engine();
        engine.handle_frame(dio_frame(240, "fe80::2"));
        let active = engine.dodags.get_active_dodag().unwrap();

        let stale_route = Route {
            target: RouteTarget::Prefix("2001:db8::dead".parse().unwrap(), 128),
            nexthop: "fe80::2".parse().unwrap(),
            nexthop_iface: "eth0".into(),
            onehop: true,
        };
        engine.dodags.get_mut(active).unwrap().downward_routes.insert(stale_route.clone());
        engine.routes.add_route(stale_route.clone());

        engine.handle_frame(dio_frame(241, "fe80::2"));

        assert!(engine.dodags.get(active).unwrap().downward_routes.is_empty());
        assert_eq!(engine.routes.lookup_nexthop(&stale_route.target), None);
    }

    fn dao_frame(path_lifetime: u8) -> Frame {
        let dao = Dao { instance_id: 0, k: false, d: false, dao_sequence: Lollipop::new(1).unwrap(), dodag_id: None };
        let mut options = Vec::new();
        let target_prefix: Ipv6Addr = "2001:db8:1::42".parse().unwrap();
        RplOption::RplTarget { flags: 0, prefix_len: 128, target_prefix: target_prefix.octets().to_vec() }
            .encode(&mut options)
            .unwrap();
        RplOption::TransitInformation {
            external: false,
            path_control: 0,
            path_sequence: Lollipop::new(1).unwrap(),
            path_lifetime,
            parent_address: None,
        }
        .encode(&mut options)
        .unwrap();
        let data = RplMessage { body: RplBody::Dao(dao), options }.encode().unwrap();
        Frame {
            iface: "eth0".into(),
            src: "fe80::1".parse().unwrap(),
            dst: rpl_common::constants::ALL_RPL_NODES,
            data,
        }
    }

    /// spec.md §8 scenario 4: a DAO with Path Lifetime 0xff installs a
    /// downward route; a subsequent No-Path DAO (Path Lifetime 0x00) for the
    /// same target withdraws it from both the DODAG and the route cache.
    #[test]
    fn dao_then_no_path_withdraws_downward_route() {
        let mut engine = root_engine();
        let active = engine.dodags.get_active_dodag().unwrap();
        let target = RouteTarget::Prefix("2001:db8:1::42".parse().unwrap(), 128);

        engine.handle_frame(dao_frame(0xff));
        assert_eq!(engine.routes.lookup_nexthop(&target), Some("fe80::1".parse().unwrap()));
        assert!(!engine.dodags.get(active).unwrap().downward_routes.is_empty());

        engine.handle_frame(dao_frame(0x00));
        assert_eq!(engine.routes.lookup_nexthop(&target), None);
        assert!(engine.dodags.get(active).unwrap().downward_routes.is_empty());
    }
}
