use thiserror::Error;

/// Wire-decode/encode failures (SPEC_FULL §4.2, §7). A `CodecError` never
/// propagates past the engine's dispatch boundary: handlers catch it, log a
/// `warn!`, and drop the frame.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated input: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("declared length {declared} underflows header constant {min}")]
    LengthUnderflow { declared: usize, min: usize },

    #[error("unknown option type {0}")]
    UnknownOption(u8),

    #[error("unknown ICMPv6 RPL code {0:#04x}")]
    UnknownCode(u8),

    #[error("field {0} out of range on encode")]
    FieldRange(&'static str),
}
