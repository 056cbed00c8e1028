//! Shared primitives used by every other crate in the workspace: the
//! lollipop sequence counter, an `Ipv6Addr` newtype with the address
//! predicates RPL cares about, SLAAC address derivation, the RFC 6550
//! constants, and the error type those last two can fail with.

pub mod address;
pub mod constants;
mod error;
mod handles;
mod lollipop;

pub use address::Address;
pub use error::RplError;
pub use handles::{DodagHandle, NodeHandle};
pub use lollipop::Lollipop;
