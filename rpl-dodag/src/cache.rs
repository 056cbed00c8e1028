//! The DODAG cache: every DODAG version this node currently tracks, indexed
//! by generational handle. Grounded on `original_source/RPL/dodag.py`'s
//! `DodagCache`.

use crate::dodag::Dodag;
use crate::error::DodagError;
use rpl_common::{DodagHandle, Lollipop};
use std::net::Ipv6Addr;

struct Slot {
    dodag: Option<Dodag>,
    generation: u64,
}

#[derive(Default)]
pub struct DodagCache {
    slots: Vec<Slot>,
}

impl DodagCache {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.dodag.is_none())
    }

    /// Rejects a duplicate `(instanceID, version, dodagID)` triple.
    pub fn add(&mut self, dodag: Dodag) -> Result<DodagHandle, DodagError> {
        if self.get_dodag(Some(dodag.dodag_id), Some(dodag.version), Some(dodag.instance_id)).first().is_some() {
            return Err(DodagError::Duplicate { instance_id: dodag.instance_id, version: dodag.version, dodag_id: dodag.dodag_id });
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.dodag.is_none() {
                slot.dodag = Some(dodag);
                return Ok(DodagHandle { index, generation: slot.generation });
            }
        }
        let index = self.slots.len();
        self.slots.push(Slot { dodag: Some(dodag), generation: 0 });
        Ok(DodagHandle { index, generation: 0 })
    }

    pub fn get(&self, handle: DodagHandle) -> Option<&Dodag> {
        self.slots.get(handle.index).filter(|s| s.generation == handle.generation).and_then(|s| s.dodag.as_ref())
    }

    pub fn get_mut(&mut self, handle: DodagHandle) -> Option<&mut Dodag> {
        self.slots.get_mut(handle.index).filter(|s| s.generation == handle.generation).and_then(|s| s.dodag.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = (DodagHandle, &Dodag)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.dodag.as_ref().map(|d| (DodagHandle { index, generation: slot.generation }, d))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (DodagHandle, &mut Dodag)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.dodag.as_mut().map(|d| (DodagHandle { index, generation }, d))
        })
    }

    pub fn get_active_dodag(&self) -> Option<DodagHandle> {
        self.iter().find(|(_, d)| d.active).map(|(h, _)| h)
    }

    /// Finds every tracked DODAG matching the given, independently optional,
    /// filters.
    pub fn get_dodag(&self, dodag_id: Option<Ipv6Addr>, version: Option<Lollipop>, instance_id: Option<u8>) -> Vec<DodagHandle> {
        self.iter()
            .filter(|(_, d)| dodag_id.is_none_or(|id| d.dodag_id == id))
            .filter(|(_, d)| version.is_none_or(|v| d.version == v))
            .filter(|(_, d)| instance_id.is_none_or(|i| d.instance_id == i))
            .map(|(h, _)| h)
            .collect()
    }

    /// For every `(instanceID, dodagID)` group tracking more than one
    /// version, removes every non-active version older than the group's
    /// newest and returns their now-invalid handles. Removing the slot
    /// rather than merely flagging it is safe: every handle is compared by
    /// value, never dereferenced blindly, so a stale handle downstream
    /// (e.g. a neighbor's `dodag` field) still resolves to "gone" rather
    /// than panicking or aliasing a different DODAG that reuses the slot.
    pub fn purge_old_versions(&mut self) -> Vec<DodagHandle> {
        let mut groups: Vec<(u8, Ipv6Addr)> = Vec::new();
        for (_, d) in self.iter() {
            let key = (d.instance_id, d.dodag_id);
            if !groups.contains(&key) {
                groups.push(key);
            }
        }

        let mut stale = Vec::new();
        for (instance_id, dodag_id) in groups {
            let mut members: Vec<(DodagHandle, Lollipop)> =
                self.iter().filter(|(_, d)| d.instance_id == instance_id && d.dodag_id == dodag_id).map(|(h, d)| (h, d.version)).collect();
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|a, b| a.1.rpl_cmp(b.1));
            let newest = members.last().unwrap().1;
            for (handle, version) in members {
                if version == newest {
                    continue;
                }
                if self.get(handle).map(|d| d.active).unwrap_or(false) {
                    continue;
                }
                stale.push(handle);
            }
        }

        for handle in &stale {
            if let Some(slot) = self.slots.get_mut(handle.index) {
                slot.dodag = None;
                slot.generation += 1;
            }
        }

        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dodag(dodag_id: &str, version: u16) -> Dodag {
        Dodag::new_learned(0, Lollipop::new(version).unwrap(), true, 2, 0, Lollipop::default(), dodag_id.parse().unwrap())
    }

    #[test]
    fn rejects_duplicate_keys() {
        let mut cache = DodagCache::new();
        cache.add(dodag("2001:db8::1", 10)).unwrap();
        assert!(matches!(cache.add(dodag("2001:db8::1", 10)), Err(DodagError::Duplicate { .. })));
    }

    #[test]
    fn get_dodag_filters_independently() {
        let mut cache = DodagCache::new();
        let h1 = cache.add(dodag("2001:db8::1", 10)).unwrap();
        let h2 = cache.add(dodag("2001:db8::1", 20)).unwrap();
        cache.add(dodag("2001:db8::2", 10)).unwrap();

        let by_id = cache.get_dodag(Some("2001:db8::1".parse().unwrap()), None, Some(0));
        assert_eq!(by_id.len(), 2);
        assert!(by_id.contains(&h1) && by_id.contains(&h2));

        let exact = cache.get_dodag(Some("2001:db8::1".parse().unwrap()), Some(Lollipop::new(20).unwrap()), Some(0));
        assert_eq!(exact, vec![h2]);
    }

    #[test]
    fn purge_old_versions_removes_everything_but_the_newest_and_the_active_one() {
        let mut cache = DodagCache::new();
        let old = cache.add(dodag("2001:db8::1", 10)).unwrap();
        let newest = cache.add(dodag("2001:db8::1", 20)).unwrap();
        cache.get_mut(newest).unwrap().active = true;

        let purged = cache.purge_old_versions();
        assert_eq!(purged, vec![old]);
        assert!(cache.get(old).is_none());
        assert!(cache.get(newest).is_some());
    }

    #[test]
    fn purge_old_versions_spares_a_stale_but_still_active_dodag() {
        let mut cache = DodagCache::new();
        let stale_active = cache.add(dodag("2001:db8::1", 10)).unwrap();
        cache.get_mut(stale_active).unwrap().active = true;
        cache.add(dodag("2001:db8::1", 20)).unwrap();

        let purged = cache.purge_old_versions();
        assert!(purged.is_empty());
        assert!(cache.get(stale_active).is_some());
    }

    #[test]
    fn a_removed_handle_resolves_to_none_afterwards() {
        let mut cache = DodagCache::new();
        let old = cache.add(dodag("2001:db8::1", 10)).unwrap();
        cache.add(dodag("2001:db8::1", 20)).unwrap();
        cache.purge_old_versions();
        assert!(cache.get_mut(old).is_none());
    }
}
