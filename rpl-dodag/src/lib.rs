//! DODAG version state, the DODAG cache, and Objective Function Zero.
//! Grounded on `original_source/RPL/dodag.py` and `of_zero.py`.

mod cache;
mod dodag;
mod error;
mod of0;

pub use cache::DodagCache;
pub use dodag::Dodag;
pub use error::DodagError;
pub use of0::{compare_parents, RankCandidate};
pub use rpl_common::{DodagHandle, NodeHandle};
