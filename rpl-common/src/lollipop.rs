//! RFC 6550 §7.2 lollipop sequence counter. Grounded on
//! `original_source/RPL/lollipop.py`: values below 128 form a linear
//! region, values from 128 up wrap circularly; comparison between two
//! circular (or one circular, one linear) values uses RFC 1982
//! serial-number arithmetic with a window of 16.

use crate::error::RplError;
use std::cmp::Ordering;
use std::fmt;

const SEQUENCE_WINDOW: i32 = 16;
const MIN_VAL: u16 = 0;
const MAX_VAL: u16 = 256;
const LOLLIPOP_INT: u16 = 128;
const DEFAULT_SEQUENCE_VAL: u16 = MAX_VAL - SEQUENCE_WINDOW as u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lollipop(u16);

impl Lollipop {
    pub fn new(val: u16) -> Result<Self, RplError> {
        if val < MIN_VAL || val >= MAX_VAL {
            return Err(RplError::LollipopRange(val));
        }
        Ok(Self(val))
    }

    pub fn value(&self) -> u8 {
        self.0 as u8
    }

    /// `Lollipop.__add__`: wraps within the circular region once the
    /// counter has entered it, otherwise within the linear region.
    pub fn add(&self, delta: u16) -> Self {
        let new_val = if self.0 >= LOLLIPOP_INT { (self.0 + delta) % MAX_VAL } else { (self.0 + delta) % LOLLIPOP_INT };
        Self(new_val)
    }

    /// `Lollipop.__cmp__`, translated to `Ordering`. Two values more than
    /// `SEQUENCE_WINDOW` apart in the same region are treated as
    /// incomparable and reported `Equal` "to minimize changes to the
    /// node's state", matching the original's comment.
    pub fn rpl_cmp(&self, other: Lollipop) -> Ordering {
        let s = self.0 as i32;
        let o = other.0 as i32;
        let lollipop_int = LOLLIPOP_INT as i32;
        let max_val = MAX_VAL as i32;

        let circular_vs_linear =
            (s > lollipop_int && s < max_val && o < lollipop_int && o >= 0) || (o > lollipop_int && o < max_val && s < lollipop_int && s >= 0);
        if circular_vs_linear {
            return if (max_val + o - s) <= SEQUENCE_WINDOW { Ordering::Less } else { Ordering::Greater };
        }

        let same_region = (s < lollipop_int && s >= 0 && o < lollipop_int && o >= 0)
            || (s >= lollipop_int && s < max_val && o >= lollipop_int && o < max_val);
        if same_region {
            if (s - o).abs() <= SEQUENCE_WINDOW {
                return if s == o {
                    Ordering::Equal
                } else if (s < o && o - s < max_val) || (s > o && s - o > max_val) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
            }
            return Ordering::Equal;
        }

        Ordering::Equal
    }
}

impl Default for Lollipop {
    fn default() -> Self {
        Self(DEFAULT_SEQUENCE_VAL)
    }
}

impl fmt::Display for Lollipop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_values() {
        assert!(Lollipop::new(256).is_err());
    }

    #[test]
    fn circular_beats_linear_within_window() {
        assert_eq!(Lollipop::new(240).unwrap().rpl_cmp(Lollipop::new(5).unwrap()), Ordering::Greater);
        assert_eq!(Lollipop::new(250).unwrap().rpl_cmp(Lollipop::new(5).unwrap()), Ordering::Less);
        assert_eq!(Lollipop::new(255).unwrap().rpl_cmp(Lollipop::new(0).unwrap()), Ordering::Less);
        assert_eq!(Lollipop::new(0).unwrap().rpl_cmp(Lollipop::new(255).unwrap()), Ordering::Greater);
    }

    #[test]
    fn same_region_serial_comparison() {
        assert_eq!(Lollipop::new(0).unwrap().rpl_cmp(Lollipop::new(6).unwrap()), Ordering::Less);
        assert_eq!(Lollipop::new(128).unwrap().rpl_cmp(Lollipop::new(140).unwrap()), Ordering::Less);
        assert_eq!(Lollipop::new(127).unwrap().rpl_cmp(Lollipop::new(140).unwrap()), Ordering::Greater);
        assert_eq!(Lollipop::new(240).unwrap().rpl_cmp(Lollipop::new(240).unwrap()), Ordering::Equal);
    }

    #[test]
    fn add_wraps_within_the_active_region() {
        assert_eq!(Lollipop::new(110).unwrap().add(10).value(), 120);
        assert_eq!(Lollipop::new(120).unwrap().add(20).value(), 12);
        assert_eq!(Lollipop::new(250).unwrap().add(20).value(), 14);
    }
}
