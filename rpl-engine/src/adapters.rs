//! External collaborators the engine depends on but does not own the
//! implementation of (SPEC_FULL §1, §6): address assignment, link-layer
//! address lookup, and raw frame transmission. Each is a small trait with an
//! in-memory/no-op implementation, the same shape `rpl-route`'s
//! `FibAdapter`/`NoopFibAdapter` already uses.

use rpl_common::Address;
use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::sync::Mutex;

/// Owns the set of addresses SLAAC-assigned to this node from learned
/// prefixes. Grounded on `original_source/RPL/address_cache.py`
/// (`AddressCache.add`/`is_assigned`/`list`).
pub trait AddressAdapter: Send + Sync {
    fn assign(&self, iface: &str, address: Address, prefix_len: u8, valid_lifetime: u32, preferred_lifetime: u32) -> bool;
    fn is_assigned(&self, address: &Ipv6Addr) -> bool;
    fn assigned_addresses(&self) -> Vec<Address>;
    fn withdraw_all(&self);
}

#[derive(Default)]
pub struct InMemoryAddressAdapter {
    assigned: Mutex<HashSet<Ipv6Addr>>,
}

impl InMemoryAddressAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AddressAdapter for InMemoryAddressAdapter {
    fn assign(&self, iface: &str, address: Address, prefix_len: u8, valid_lifetime: u32, preferred_lifetime: u32) -> bool {
        let inserted = self.assigned.lock().unwrap().insert(address.inner());
        if inserted {
            tracing::debug!(%iface, %address, prefix_len, valid_lifetime, preferred_lifetime, "assigned SLAAC address");
        }
        inserted
    }

    fn is_assigned(&self, address: &Ipv6Addr) -> bool {
        self.assigned.lock().unwrap().contains(address)
    }

    fn assigned_addresses(&self) -> Vec<Address> {
        self.assigned.lock().unwrap().iter().copied().map(Address::new).collect()
    }

    fn withdraw_all(&self) {
        self.assigned.lock().unwrap().clear();
    }
}

/// Transmits an already-encoded ICMPv6 RPL datagram out an interface. The
/// "endpoints" named in SPEC_FULL §6 are logical identifiers for this
/// channel pair, not literal ZeroMQ sockets; the concrete socket I/O lives
/// behind this trait, out of scope here.
pub trait LinkSender: Send + Sync {
    fn send(&self, iface: &str, destination: Ipv6Addr, data: &[u8]) -> bool;
}

pub struct NoopLinkSender;

impl LinkSender for NoopLinkSender {
    fn send(&self, iface: &str, destination: Ipv6Addr, data: &[u8]) -> bool {
        tracing::debug!(%iface, %destination, bytes = data.len(), "noop link sender: send");
        true
    }
}

/// Resolves an interface's hardware address, used to derive a SLAAC IID via
/// `rpl_common::address::derive_address`. Grounded on
/// `original_source/RPL/address.py`'s `gv.link_cache.get_lladdr(interface)`
/// call; no dedicated `link.py` module was part of the distillation this
/// crate learned from, so only the lookup shape is grounded, not a layout.
pub trait LinkAdapter: Send + Sync {
    fn hardware_address(&self, iface: &str) -> Option<Vec<u8>>;
}

pub struct NoopLinkAdapter;

impl LinkAdapter for NoopLinkAdapter {
    fn hardware_address(&self, iface: &str) -> Option<Vec<u8>> {
        tracing::debug!(%iface, "noop link adapter: no hardware address known");
        None
    }
}

/// Reports a fixed EUI-48 for every interface; used where tests need SLAAC
/// address derivation to actually succeed.
#[cfg(test)]
pub struct FixedLinkAdapter(pub [u8; 6]);

#[cfg(test)]
impl LinkAdapter for FixedLinkAdapter {
    fn hardware_address(&self, _iface: &str) -> Option<Vec<u8>> {
        Some(self.0.to_vec())
    }
}
