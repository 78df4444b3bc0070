/// Errors that can occur while shaping a command frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// The register id does not fit in one byte.
    #[error("register id {0:#x} does not fit in one byte")]
    RegisterOutOfRange(u32),

    /// The opcode does not fit in one byte.
    #[error("opcode {0:#x} does not fit in one byte")]
    OpcodeOutOfRange(u32),

    /// A received buffer is not exactly one frame long.
    #[error("frame must be exactly {expected} bytes (got {actual})")]
    BadLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, EncodingError>;
