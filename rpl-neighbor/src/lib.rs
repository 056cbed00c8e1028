//! Neighbor cache: storage and lookup only. Grounded on
//! `original_source/RPL/neighbor_cache.py`'s `NeighborCache`/`Node`, but
//! deliberately thin — the Python version reaches into `gv.dodag_cache`/
//! `gv.route_cache` from inside `set_preferred`/`update_DIO_parent`, which
//! is exactly the cyclic back-reference SPEC_FULL §9 replaces with
//! generational handles owned by a single caller that can see every cache
//! at once. That caller is the engine (`rpl-engine/src/parent_selection.rs`);
//! this crate just holds nodes and answers questions about them.

use rpl_common::{Address, Lollipop};
pub use rpl_common::{DodagHandle, NodeHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub iface: String,
    pub address: Address,
    pub dodag: DodagHandle,
    pub rank: u16,
    pub dtsn: Lollipop,
    pub preferred: bool,
}

struct Slot {
    node: Option<Node>,
    generation: u64,
}

#[derive(Default)]
pub struct NeighborCache {
    slots: Vec<Slot>,
    preferred: Option<NodeHandle>,
    parents: Vec<NodeHandle>,
}

impl NeighborCache {
    pub fn new() -> Self {
        Self { slots: Vec::new(), preferred: None, parents: Vec::new() }
    }

    /// Insert a new node, or update rank/dtsn on an existing one for the
    /// same `(iface, address, dodag)` triple.
    pub fn register_node(&mut self, iface: &str, address: Address, dodag: DodagHandle, rank: u16, dtsn: Lollipop) -> NodeHandle {
        if let Some(handle) = self.get_node(iface, &address, dodag) {
            if let Some(node) = self.node_mut(handle) {
                node.rank = rank;
                node.dtsn = dtsn;
            }
            return handle;
        }

        let node = Node { iface: iface.to_string(), address, dodag, rank, dtsn, preferred: false };
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.is_none() {
                slot.node = Some(node);
                return NodeHandle { index, generation: slot.generation };
            }
        }
        let index = self.slots.len();
        self.slots.push(Slot { node: Some(node), generation: 0 });
        NodeHandle { index, generation: 0 }
    }

    pub fn get_node(&self, iface: &str, address: &Address, dodag: DodagHandle) -> Option<NodeHandle> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let node = slot.node.as_ref()?;
            if node.iface == iface && node.address == *address && node.dodag == dodag {
                Some(NodeHandle { index, generation: slot.generation })
            } else {
                None
            }
        })
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.slots.get(handle.index).filter(|s| s.generation == handle.generation).and_then(|s| s.node.as_ref())
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.slots.get_mut(handle.index).filter(|s| s.generation == handle.generation).and_then(|s| s.node.as_mut())
    }

    pub fn preferred(&self) -> Option<NodeHandle> {
        self.preferred
    }

    pub fn set_preferred(&mut self, handle: Option<NodeHandle>) {
        self.preferred = handle;
    }

    pub fn set_parents(&mut self, parents: Vec<NodeHandle>) {
        self.parents = parents;
    }

    pub fn parents(&self) -> &[NodeHandle] {
        &self.parents
    }

    pub fn is_parent(&self, handle: NodeHandle) -> bool {
        self.parents.contains(&handle)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.node.is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|n| (NodeHandle { index, generation: slot.generation }, n))
        })
    }

    pub fn neighbors_for_dodag(&self, dodag: DodagHandle) -> Vec<NodeHandle> {
        self.iter().filter(|(_, n)| n.dodag == dodag).map(|(h, _)| h).collect()
    }

    /// Removes the node matching `(dodag, address)` across any interface,
    /// bumping its slot's generation so any handle still pointing at it
    /// resolves to `None`. Clears it from the parent set and the preferred
    /// slot if it was either.
    pub fn remove_node_by_address(&mut self, dodag: DodagHandle, address: &Address) -> Option<Node> {
        let found = self.slots.iter().enumerate().find_map(|(index, slot)| {
            let node = slot.node.as_ref()?;
            if node.dodag == dodag && node.address == *address { Some(index) } else { None }
        })?;

        let handle = NodeHandle { index: found, generation: self.slots[found].generation };
        let removed = self.slots[found].node.take();
        self.slots[found].generation += 1;

        self.parents.retain(|&h| h != handle);
        if self.preferred == Some(handle) {
            self.preferred = None;
        }

        removed
    }

    /// Removes every node belonging to `dodag`.
    pub fn remove_nodes_by_dodag(&mut self, dodag: DodagHandle) {
        let victims: Vec<Address> =
            self.iter().filter(|(_, n)| n.dodag == dodag).map(|(_, n)| n.address).collect();
        for address in victims {
            self.remove_node_by_address(dodag, &address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpl_dodag::{Dodag, DodagCache};

    fn dodag_handle(cache: &mut DodagCache) -> DodagHandle {
        cache.add(Dodag::new_root(0, "2001:db8::1".parse().unwrap(), vec![])).unwrap()
    }

    #[test]
    fn registering_the_same_address_twice_updates_rather_than_duplicates() {
        let mut cache = DodagCache::new();
        let handle = dodag_handle(&mut cache);
        let mut neighbors = NeighborCache::new();
        let addr = Address::new("fe80::1".parse().unwrap());
        let h1 = neighbors.register_node("eth0", addr, handle, 256, Lollipop::default());
        let h2 = neighbors.register_node("eth0", addr, handle, 512, Lollipop::default());
        assert_eq!(h1, h2);
        assert_eq!(neighbors.node(h1).unwrap().rank, 512);
    }

    #[test]
    fn removing_a_node_invalidates_its_handle() {
        let mut cache = DodagCache::new();
        let handle = dodag_handle(&mut cache);
        let mut neighbors = NeighborCache::new();
        let addr = Address::new("fe80::1".parse().unwrap());
        let h = neighbors.register_node("eth0", addr, handle, 256, Lollipop::default());
        neighbors.set_preferred(Some(h));

        assert!(neighbors.remove_node_by_address(handle, &addr).is_some());
        assert!(neighbors.node(h).is_none());
        assert!(neighbors.preferred().is_none());
    }
}
