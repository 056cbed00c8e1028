use thiserror::Error;

/// Failures that can happen manipulating the shared primitives this crate
/// owns: an out-of-range lollipop value, or an address that cannot be
/// derived from a link-layer address and a prefix.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RplError {
    #[error("lollipop value {0} is out of range [0, 256)")]
    LollipopRange(u16),

    #[error("link-layer address {0:?} has an unsupported length for IID derivation")]
    UnsupportedLladdrLength(Vec<u8>),
}
