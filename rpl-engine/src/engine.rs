//! Engine state, message construction/transmission and timer arming. The
//! DIS/DIO/DAO/DAO-ACK handlers live in `dispatch.rs`, parent selection in
//! `parent_selection.rs`, and the CLI command table in `cli.rs` — all as
//! `impl Engine` blocks over the struct defined here.

use crate::adapters::{AddressAdapter, LinkAdapter, LinkSender};
use crate::timer::{TimerEvent, TimerWheel};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rpl_common::constants::{
    ALL_RPL_NODES, DEFAULT_DAO_ACK_DELAY_SECS, DEFAULT_DAO_DELAY_SECS, DEFAULT_DAO_MAX_TRANS_RETRY,
    DEFAULT_INTERVAL_BETWEEN_DIS_SECS, RPL_DEFAULT_INSTANCE,
};
use rpl_common::Address;
use rpl_dodag::{Dodag, DodagCache, DodagHandle};
use rpl_neighbor::NeighborCache;
use rpl_route::{Route, RouteCache, RouteTarget};
use rpl_wire::{Dis, RplBody, RplMessage};
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// A decoded-at-the-edge inbound wire frame; `data` is still the raw ICMPv6
/// payload, decoded once the engine gets to it so a malformed frame never
/// blocks the receiver task producing it. Grounded on `message.py`'s
/// `Message(msg, source, destination, iface)`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub iface: String,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub data: Vec<u8>,
}

/// One CLI invocation, paired with a channel to carry the formatted
/// response back to whoever asked (grounded on `cli.py`'s `cli_sock.send`).
#[derive(Debug)]
pub struct CliRequest {
    pub command: String,
    pub respond_to: oneshot::Sender<String>,
}

/// Start-up parameters, already validated by the process shell (`rpld`).
pub struct EngineConfig {
    pub ifaces: Vec<String>,
    pub is_root: bool,
    pub dodag_ids: Vec<Ipv6Addr>,
    pub prefixes: Vec<Ipv6Addr>,
}

/// Sidecar state for an outstanding unicast DAO awaiting an ACK. The
/// original stores `DAO_ACK_source`/`DAO_ACK_source_iface` directly on the
/// `DODAG` object; here it lives in the engine instead of growing
/// `rpl-dodag`'s `Dodag` with fields only the engine ever touches.
#[derive(Debug, Clone)]
struct DaoAckWait {
    dest: Ipv6Addr,
    dest_iface: String,
}

pub struct Engine {
    pub(crate) ifaces: Vec<String>,
    pub(crate) global_instance_id: Option<u8>,
    pub(crate) dodags: DodagCache,
    pub(crate) neighbors: NeighborCache,
    pub(crate) routes: RouteCache,
    pub(crate) timers: TimerWheel,

    trickle_gen: HashMap<DodagHandle, u64>,
    dao_ack_gen: HashMap<DodagHandle, u64>,
    dao_ack_wait: HashMap<DodagHandle, DaoAckWait>,
    dao_delay_armed: HashMap<DodagHandle, bool>,

    rng: StdRng,

    pub(crate) address_adapter: Box<dyn AddressAdapter>,
    pub(crate) link_adapter: Box<dyn LinkAdapter>,
    pub(crate) link_sender: Box<dyn LinkSender>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        address_adapter: Box<dyn AddressAdapter>,
        link_adapter: Box<dyn LinkAdapter>,
        link_sender: Box<dyn LinkSender>,
    ) -> Self {
        let mut engine = Self {
            ifaces: config.ifaces,
            global_instance_id: None,
            dodags: DodagCache::new(),
            neighbors: NeighborCache::new(),
            routes: RouteCache::new(Box::new(rpl_route::NoopFibAdapter)),
            timers: TimerWheel::new(),
            trickle_gen: HashMap::new(),
            dao_ack_gen: HashMap::new(),
            dao_ack_wait: HashMap::new(),
            dao_delay_armed: HashMap::new(),
            rng: StdRng::from_os_rng(),
            address_adapter,
            link_adapter,
            link_sender,
        };

        if config.is_root {
            engine.global_instance_id = Some(RPL_DEFAULT_INSTANCE);
            for dodag_id in config.dodag_ids {
                let dodag = Dodag::new_root(RPL_DEFAULT_INSTANCE, dodag_id, config.prefixes.clone());
                match engine.dodags.add(dodag) {
                    Ok(h) => engine.start_trickle(h),
                    Err(e) => warn!(error = %e, %dodag_id, "could not add root DODAG to cache"),
                }
            }
        }

        // Matches `process_loop`'s "no need to send a DIS when the node is a
        // DODAG Root" comment: a root never enters `dodags.is_empty()` here,
        // so the recurring DIS-broadcast timer never gets its first kick.
        if engine.dodags.is_empty() {
            engine.on_dis_broadcast_timer();
        }

        engine
    }

    /// Drive the engine until `shutdown_rx` fires. The `select!` is biased
    /// so any timer already due is drained before a fresh wire frame or CLI
    /// request is accepted: an overdue retransmit must never be starved by
    /// a burst of incoming DIOs.
    pub async fn run(
        &mut self,
        mut wire_rx: mpsc::Receiver<Frame>,
        mut cli_rx: mpsc::Receiver<CliRequest>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        info!("starting message processing loop");
        loop {
            let sleep = match self.timers.next_deadline() {
                Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)),
                None => tokio::time::sleep(Duration::from_secs(3600)),
            };
            tokio::pin!(sleep);

            tokio::select! {
                biased;

                _ = &mut shutdown_rx => {
                    info!("shutdown requested");
                    self.shutdown().await;
                    return;
                }

                _ = &mut sleep, if self.timers.next_deadline().is_some() => {
                    if let Some(event) = self.timers.pop_due() {
                        self.handle_timer(event);
                    }
                }

                Some(frame) = wire_rx.recv() => {
                    self.handle_frame(frame);
                }

                Some(req) = cli_rx.recv() => {
                    let response = self.handle_cli_command(&req.command);
                    let _ = req.respond_to.send(response);
                }

                else => {
                    debug!("all channels closed, shutting down");
                    self.shutdown().await;
                    return;
                }
            }
        }
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::DisBroadcast => self.on_dis_broadcast_timer(),
            TimerEvent::TrickleFire(handle, gen) => self.on_trickle_fire(handle, gen),
            TimerEvent::TrickleIntervalEnd(handle, gen) => self.on_trickle_interval_end(handle, gen),
            TimerEvent::DaoDelay(handle) => self.on_dao_delay_timer(handle),
            TimerEvent::DaoAckRetry(handle, gen) => self.on_dao_ack_retry_timer(handle, gen),
        }
    }

    /// Poison every tracked DODAG (No-Path DAOs plus a shutdown DIO),
    /// withdraw assigned addresses and drain the route cache. Grounded on
    /// `dodag.py`'s `poison(shutdown=True)`.
    pub async fn shutdown(&mut self) {
        let handles: Vec<DodagHandle> = self.dodags.iter().map(|(h, _)| h).collect();
        for h in handles {
            self.poison_dodag(h, true);
        }
        self.routes.empty_cache();
        self.address_adapter.withdraw_all();
    }

    // ---- DIS broadcast loop --------------------------------------------

    fn on_dis_broadcast_timer(&mut self) {
        debug!("checking if a DIS broadcast is required");
        if self.dodags.is_empty() {
            debug!("broadcasting DIS");
            let msg = RplMessage { body: RplBody::Dis(Dis { flags: 0, reserved: 0 }), options: Vec::new() };
            self.broadcast(&msg);
        } else {
            debug!("no DIS broadcast is required");
        }
        self.timers.schedule_after(Duration::from_secs(DEFAULT_INTERVAL_BETWEEN_DIS_SECS), TimerEvent::DisBroadcast);
    }

    fn broadcast(&self, msg: &RplMessage) {
        let Ok(encoded) = msg.encode() else {
            warn!("failed to encode outgoing message, dropping");
            return;
        };
        for iface in &self.ifaces {
            self.link_sender.send(iface, ALL_RPL_NODES, &encoded);
        }
    }

    // ---- Trickle --------------------------------------------------------

    fn bump_trickle_gen(&mut self, handle: DodagHandle) -> u64 {
        let gen = self.trickle_gen.entry(handle).or_insert(0);
        *gen += 1;
        *gen
    }

    pub(crate) fn start_trickle(&mut self, handle: DodagHandle) {
        let gen = self.bump_trickle_gen(handle);
        let Some(dodag) = self.dodags.get_mut(handle) else { return };
        let t = dodag.dio_timer.start(&mut self.rng);
        let interval = dodag.dio_timer.current_interval();
        self.timers.schedule_after(t, TimerEvent::TrickleFire(handle, gen));
        self.timers.schedule_after(interval, TimerEvent::TrickleIntervalEnd(handle, gen));
    }

    fn begin_trickle_interval(&mut self, handle: DodagHandle) {
        let gen = self.bump_trickle_gen(handle);
        let Some(dodag) = self.dodags.get_mut(handle) else { return };
        let t = dodag.dio_timer.begin_interval(&mut self.rng);
        let interval = dodag.dio_timer.current_interval();
        self.timers.schedule_after(t, TimerEvent::TrickleFire(handle, gen));
        self.timers.schedule_after(interval, TimerEvent::TrickleIntervalEnd(handle, gen));
    }

    /// Reset the trickle timer to Imin (an inconsistency was heard) and, if
    /// that actually changed anything, reschedule immediately.
    pub(crate) fn reset_trickle(&mut self, handle: DodagHandle) {
        let reset = self.dodags.get_mut(handle).map(|d| d.dio_timer.hear_inconsistent()).unwrap_or(false);
        if reset {
            self.begin_trickle_interval(handle);
        }
    }

    fn on_trickle_fire(&mut self, handle: DodagHandle, gen: u64) {
        if self.trickle_gen.get(&handle) != Some(&gen) {
            return; // stale firing, superseded by a reset
        }
        let should_transmit = self.dodags.get(handle).map(|d| d.dio_timer.should_transmit()).unwrap_or(false);
        if should_transmit {
            self.send_dio(handle, None, None, false);
        }
    }

    fn on_trickle_interval_end(&mut self, handle: DodagHandle, gen: u64) {
        if self.trickle_gen.get(&handle) != Some(&gen) {
            return;
        }
        if let Some(dodag) = self.dodags.get_mut(handle) {
            dodag.dio_timer.on_interval_end();
        }
        self.begin_trickle_interval(handle);
    }

    // ---- DIO --------------------------------------------------------------

    /// `dest`/`iface` override the default (broadcast on every registered
    /// interface); used for unicast DIO replies to a DIS. Arms the DAO-delay
    /// timer unless the DODAG is root or `shutdown` was requested, mirroring
    /// `dodag.py`'s `sendDIO`.
    pub(crate) fn send_dio(&mut self, handle: DodagHandle, iface: Option<&str>, dest: Option<Ipv6Addr>, shutdown: bool) {
        let Some(dodag) = self.dodags.get(handle) else { return };
        let msg = dodag.build_dio();
        let is_root = dodag.is_root;
        let Ok(encoded) = msg.encode() else {
            warn!("failed to encode DIO, dropping");
            return;
        };

        match (iface, dest) {
            (Some(iface), Some(dest)) => {
                self.link_sender.send(iface, dest, &encoded);
            }
            _ => {
                for iface in self.ifaces.clone() {
                    self.link_sender.send(&iface, ALL_RPL_NODES, &encoded);
                }
            }
        }

        if !is_root && !shutdown {
            self.arm_dao_delay(handle);
        }
    }

    // ---- DAO ----------------------------------------------------------------

    pub(crate) fn arm_dao_delay(&mut self, handle: DodagHandle) {
        if *self.dao_delay_armed.get(&handle).unwrap_or(&false) {
            return;
        }
        self.dao_delay_armed.insert(handle, true);
        self.timers.schedule_after(Duration::from_secs(DEFAULT_DAO_DELAY_SECS), TimerEvent::DaoDelay(handle));
    }

    fn on_dao_delay_timer(&mut self, handle: DodagHandle) {
        self.dao_delay_armed.insert(handle, false);
        self.send_two_daos(handle);
    }

    /// `dodag.py`'s `sendTwoDAOs`: a multicast retransmission of the
    /// previous DAO sequence followed by a fresh unicast DAO to the
    /// preferred parent.
    fn send_two_daos(&mut self, handle: DodagHandle) {
        self.send_dao(handle, None, Some(ALL_RPL_NODES), true, false);
        self.send_dao(handle, None, None, false, false);
    }

    /// Resolves the destination (explicit `dest` wins; otherwise the
    /// preferred parent's link-local address), validates it is either
    /// All-RPL-Nodes or link-local, builds and sends the DAO, and for a
    /// unicast destination arms the DAO-ACK retry timer.
    pub(crate) fn send_dao(
        &mut self,
        handle: DodagHandle,
        dest_iface: Option<String>,
        dest: Option<Ipv6Addr>,
        retransmit: bool,
        nopath: bool,
    ) {
        let (destination, iface) = match (dest, dest_iface) {
            (Some(d), Some(i)) => (d, i),
            (Some(d), None) => (d, self.ifaces.first().cloned().unwrap_or_default()),
            (None, _) => {
                let Some(preferred) = self.dodags.get(handle).and_then(|d| d.preferred_parent) else {
                    debug!("no preferred parent, cannot send DAO");
                    return;
                };
                let Some(node) = self.neighbors.node(preferred) else {
                    debug!("preferred parent not in neighbor cache, cannot send DAO");
                    return;
                };
                (node.address.inner(), node.iface.clone())
            }
        };

        let is_multicast = Address::new(destination).is_all_rpl_nodes();
        if !is_multicast && !Address::new(destination).is_link_local() {
            debug!(%destination, "DAO destination is neither link-local nor all-RPL-nodes, dropping");
            return;
        }

        let Some(dodag) = self.dodags.get(handle) else { return };
        let active_or_nopath = dodag.active || nopath;
        if !active_or_nopath {
            debug!("DODAG is not active and this is not a No-Path DAO, dropping");
            return;
        }

        let own_targets: Vec<Ipv6Addr> = self.address_adapter.assigned_addresses().iter().map(|a| a.inner()).collect();

        let Some(dodag) = self.dodags.get_mut(handle) else { return };
        let msg = dodag.build_dao(destination, &own_targets, nopath, retransmit);
        let Ok(encoded) = msg.encode() else {
            warn!("failed to encode DAO, dropping");
            return;
        };

        if is_multicast {
            for iface in self.ifaces.clone() {
                self.link_sender.send(&iface, destination, &encoded);
            }
        } else {
            self.link_sender.send(&iface, destination, &encoded);
            self.dao_ack_wait.insert(handle, DaoAckWait { dest: destination, dest_iface: iface });
            self.arm_dao_ack_retry(handle);
        }
    }

    fn arm_dao_ack_retry(&mut self, handle: DodagHandle) {
        if let Some(dodag) = self.dodags.get_mut(handle) {
            dodag.dao_ack_armed = true;
        }
        let gen = self.dao_ack_gen.entry(handle).or_insert(0);
        *gen += 1;
        let gen = *gen;
        self.timers.schedule_after(Duration::from_secs(DEFAULT_DAO_ACK_DELAY_SECS), TimerEvent::DaoAckRetry(handle, gen));
    }

    pub(crate) fn cancel_dao_ack_timer(&mut self, handle: DodagHandle) {
        if let Some(dodag) = self.dodags.get_mut(handle) {
            dodag.dao_ack_armed = false;
        }
        self.dao_ack_wait.remove(&handle);
    }

    fn on_dao_ack_retry_timer(&mut self, handle: DodagHandle, gen: u64) {
        if self.dao_ack_gen.get(&handle) != Some(&gen) {
            return; // stale, superseded by either a later retry or a cancel
        }
        let armed = self.dodags.get(handle).map(|d| d.dao_ack_armed).unwrap_or(false);
        if !armed {
            return;
        }

        let retry = self.dodags.get(handle).map(|d| d.dao_trans_retry).unwrap_or(0);
        if retry >= DEFAULT_DAO_MAX_TRANS_RETRY {
            if let Some(dodag) = self.dodags.get_mut(handle) {
                dodag.dao_trans_retry = 0;
                dodag.dao_ack_armed = false;
            }
            if let Some(wait) = self.dao_ack_wait.remove(&handle) {
                let addr = Address::new(wait.dest);
                let route_updated = self.remove_neighbor_by_address(handle, &addr);
                let parent_updated = self.update_dio_parent();
                if route_updated || parent_updated {
                    self.reset_trickle(handle);
                }
            }
        } else {
            if let Some(dodag) = self.dodags.get_mut(handle) {
                dodag.dao_trans_retry += 1;
            }
            if let Some(wait) = self.dao_ack_wait.get(&handle).cloned() {
                self.send_dao(handle, Some(wait.dest_iface), Some(wait.dest), true, false);
            }
        }
    }

    pub(crate) fn on_dao_ack_received(&mut self, handle: DodagHandle, source: Ipv6Addr, dao_sequence: u8, status: u8) {
        let matches = self.dodags.get(handle).map(|d| {
            d.dao_ack_armed && d.last_dao_sequence.value() == dao_sequence && status == 0
        }).unwrap_or(false);
        let wait_matches = self.dao_ack_wait.get(&handle).map(|w| w.dest == source).unwrap_or(false);

        if matches && wait_matches {
            debug!(%source, "DAO-ACK received, disabling the DAO retransmission timer");
            if let Some(dodag) = self.dodags.get_mut(handle) {
                dodag.dao_trans_retry = 0;
            }
            self.cancel_dao_ack_timer(handle);
        } else {
            debug!("DAO-ACK message does not match a previously sent DAO message");
        }
    }

    // ---- Poisoning / cleanup -----------------------------------------------

    /// `dodag.py`'s `poison`: always sets the rank to infinite and sends a
    /// shutdown DIO; on a full shutdown (not just a local repair) also
    /// withdraws every downward route with No-Path DAOs first.
    pub(crate) fn poison_dodag(&mut self, handle: DodagHandle, shutdown: bool) {
        if shutdown {
            let routes = self.dodags.get_mut(handle).map(|d| d.downward_routes_reset()).unwrap_or_default();
            if !routes.is_empty() {
                self.send_dao(handle, None, Some(ALL_RPL_NODES), false, true);
                self.send_dao(handle, None, None, false, true);
            }
            self.routes.remove_routes(routes.iter());
        }
        if let Some(dodag) = self.dodags.get_mut(handle) {
            dodag.poison();
        }
        self.send_dio(handle, None, None, true);
        self.cleanup_dodag(handle);
    }

    /// `dodag.py`'s `cleanup`: drops the neighbor cache entries for this
    /// DODAG. Never called on the currently active DODAG, matching the
    /// original's `remove_nodes_by_dodag` guard (`not node.dodag.active`).
    fn cleanup_dodag(&mut self, handle: DodagHandle) {
        let active = self.dodags.get(handle).map(|d| d.active).unwrap_or(false);
        if active {
            return;
        }
        self.neighbors.remove_nodes_by_dodag(handle);
    }

    /// `neighbor_cache.py`'s `remove_node_by_address`, with the route-cache
    /// reconciliation the original performs inline when the removed node
    /// belonged to the active DODAG. Returns whether anything changed.
    pub(crate) fn remove_neighbor_by_address(&mut self, handle: DodagHandle, address: &Address) -> bool {
        let was_preferred = self
            .neighbors
            .preferred()
            .and_then(|p| self.neighbors.node(p).cloned())
            .map(|n| n.dodag == handle && n.address == *address)
            .unwrap_or(false);

        let removed = self.neighbors.remove_node_by_address(handle, address);
        let mut updated = removed.is_some();

        if let Some(node) = &removed {
            let dodag_active = self.dodags.get(handle).map(|d| d.active).unwrap_or(false);
            if dodag_active {
                if let Some(dodag) = self.dodags.get_mut(handle) {
                    let victims = dodag.downward_routes_remove_by_nexthop(address.inner());
                    if !victims.is_empty() {
                        updated = true;
                        self.routes.remove_routes(victims.iter());
                    }
                }
                if self.routes.remove_nexthop(address.inner()) {
                    updated = true;
                }
            }

            if was_preferred {
                let route = Route {
                    target: RouteTarget::Default,
                    nexthop: address.inner(),
                    nexthop_iface: node.iface.clone(),
                    onehop: true,
                };
                self.routes.remove_route(&route);
            }
        }

        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryAddressAdapter, NoopLinkAdapter};
    use std::sync::{Arc, Mutex};

    type SentLog = Arc<Mutex<Vec<(String, Ipv6Addr, Vec<u8>)>>>;

    /// Records every frame handed to `send`, so a test can observe what the
    /// engine actually transmitted without the production `LinkSender`
    /// implementations growing test-only bookkeeping.
    struct SpySender(SentLog);

    impl LinkSender for SpySender {
        fn send(&self, iface: &str, destination: Ipv6Addr, data: &[u8]) -> bool {
            self.0.lock().unwrap().push((iface.to_string(), destination, data.to_vec()));
            true
        }
    }

    fn new_engine(is_root: bool) -> (Engine, SentLog) {
        let log: SentLog = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::new(
            EngineConfig {
                ifaces: vec!["eth0".into()],
                is_root,
                dodag_ids: vec!["2001:db8::1".parse().unwrap()],
                prefixes: vec![],
            },
            Box::new(InMemoryAddressAdapter::new()),
            Box::new(NoopLinkAdapter),
            Box::new(SpySender(log.clone())),
        );
        (engine, log)
    }

    /// spec.md §8 scenario 1: a node with no tracked DODAG broadcasts a DIS
    /// on startup instead of waiting out the DIS interval.
    #[test]
    fn broadcasts_dis_on_startup_when_no_dodag_is_tracked() {
        let log: SentLog = Arc::new(Mutex::new(Vec::new()));
        let _engine = Engine::new(
            EngineConfig { ifaces: vec!["eth0".into()], is_root: false, dodag_ids: vec![], prefixes: vec![] },
            Box::new(InMemoryAddressAdapter::new()),
            Box::new(NoopLinkAdapter),
            Box::new(SpySender(log.clone())),
        );
        let sent = log.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (iface, dest, data) = &sent[0];
        assert_eq!(iface, "eth0");
        assert_eq!(*dest, ALL_RPL_NODES);
        assert_eq!(data, &vec![0x9b, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn root_does_not_broadcast_dis_on_startup() {
        let (_engine, log) = new_engine(true);
        assert!(log.lock().unwrap().is_empty());
    }

    /// A freshly created root DODAG immediately resets its trickle timer
    /// (`Dodag::new_root`), so a DIO firing should already be scheduled.
    #[test]
    fn root_dodag_arms_its_trickle_timer() {
        let (engine, _log) = new_engine(true);
        assert!(engine.timers.next_deadline().is_some());
    }

    #[tokio::test]
    async fn shutdown_withdraws_addresses_and_empties_routes() {
        let (mut engine, _log) = new_engine(true);
        let active = engine.dodags.get_active_dodag().unwrap();
        engine.address_adapter.assign("eth0", Address::new("2001:db8::1".parse().unwrap()), 64, u32::MAX, u32::MAX);
        engine.routes.add_route(Route {
            target: RouteTarget::Default,
            nexthop: "fe80::1".parse().unwrap(),
            nexthop_iface: "eth0".into(),
            onehop: true,
        });

        engine.shutdown().await;

        assert!(engine.address_adapter.assigned_addresses().is_empty());
        assert!(engine.routes.is_empty());
        assert_eq!(engine.dodags.get(active).unwrap().rank, rpl_common::constants::INFINITE_RANK);
    }
}
