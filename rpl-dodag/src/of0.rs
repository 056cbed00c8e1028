//! Objective Function Zero, RFC 6552. Grounded on
//! `original_source/RPL/of_zero.py`'s `compute_rank_increase` and the
//! preferred-parent comparator it backs.

use rpl_common::Lollipop;
use std::cmp::Ordering;
use std::net::Ipv6Addr;
use std::time::Instant;

/// Everything the comparator needs about one candidate parent's DODAG, taken
/// as a snapshot rather than a live reference so two candidates rooted in
/// different DODAGs can be compared side by side.
#[derive(Debug, Clone, Copy)]
pub struct RankCandidate {
    pub ocp: u16,
    pub instance_id: u8,
    pub grounded: bool,
    pub prf: u8,
    pub dodag_id: Ipv6Addr,
    pub version: Lollipop,
    pub rank: u16,
    pub preferred: bool,
    pub last_dio: Instant,
}

/// `None` when the two candidates are not comparable at all (different
/// Objective Code Point or different RPLInstanceID). Otherwise `Less` means
/// `a` is the better parent.
///
/// Tie-break chain, in order: a grounded/floating mismatch always wins; among
/// two grounded candidates, lower Prf wins; within the same `dodag_id`, a
/// newer version wins; otherwise lower resulting rank wins; otherwise the
/// currently-preferred parent wins; otherwise the one heard from more
/// recently wins.
pub fn compare_parents(a: &RankCandidate, b: &RankCandidate) -> Option<Ordering> {
    if a.ocp != b.ocp || a.instance_id != b.instance_id {
        return None;
    }

    if a.grounded != b.grounded {
        return Some(if a.grounded { Ordering::Less } else { Ordering::Greater });
    }

    if a.grounded && a.prf != b.prf {
        return Some(a.prf.cmp(&b.prf));
    }

    if a.dodag_id == b.dodag_id && a.version != b.version {
        return Some(match a.version.rpl_cmp(b.version) {
            Ordering::Greater => Ordering::Less,
            Ordering::Less => Ordering::Greater,
            Ordering::Equal => Ordering::Equal,
        });
    }

    if a.rank != b.rank {
        return Some(a.rank.cmp(&b.rank));
    }

    if a.preferred != b.preferred {
        return Some(if a.preferred { Ordering::Less } else { Ordering::Greater });
    }

    Some(b.last_dio.cmp(&a.last_dio))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(grounded: bool, prf: u8, rank: u16, preferred: bool) -> RankCandidate {
        RankCandidate {
            ocp: 0,
            instance_id: 0,
            grounded,
            prf,
            dodag_id: "2001:db8::1".parse().unwrap(),
            version: Lollipop::default(),
            rank,
            preferred,
            last_dio: Instant::now(),
        }
    }

    #[test]
    fn different_instance_is_incomparable() {
        let mut a = candidate(true, 0, 256, false);
        let mut b = candidate(true, 0, 256, false);
        a.instance_id = 1;
        b.instance_id = 2;
        assert_eq!(compare_parents(&a, &b), None);
    }

    #[test]
    fn grounded_beats_floating() {
        let a = candidate(true, 0, 1024, false);
        let b = candidate(false, 0, 256, false);
        assert_eq!(compare_parents(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn among_grounded_lower_rank_wins_when_prf_ties() {
        let a = candidate(true, 0, 256, false);
        let b = candidate(true, 0, 1024, false);
        assert_eq!(compare_parents(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn lower_rank_wins_when_everything_else_ties() {
        let a = candidate(true, 0, 256, false);
        let b = candidate(true, 0, 512, false);
        assert_eq!(compare_parents(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn preferred_parent_wins_the_rank_tie() {
        let a = candidate(true, 0, 512, true);
        let b = candidate(true, 0, 512, false);
        assert_eq!(compare_parents(&a, &b), Some(Ordering::Less));
    }
}
