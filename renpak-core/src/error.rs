use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format mismatch at 0x{offset:X}: expected {expected}, got {actual}")]
    FormatMismatch {
        offset: usize,
        expected: String,
        actual: String,
    },

    #[error("buffer underrun: wanted {wanted} bytes at 0x{offset:X}, buffer length 0x{len:X}")]
    BufferUnderrun { offset: usize, wanted: usize, len: usize },

    #[error("unknown pickle opcode 0x{opcode:02X} at 0x{offset:X}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("unsupported pickle opcode {name} (0x{opcode:02X}) at 0x{offset:X}")]
    UnsupportedOpcode {
        name: &'static str,
        opcode: u8,
        offset: usize,
    },

    #[error("unsupported pickle protocol {0}")]
    UnsupportedProtocol(u8),

    #[error("pickle stream ended without STOP")]
    UnexpectedEof,

    #[error("memo index {index} read before it was written")]
    MemoMiss { index: u32 },

    #[error("pickle stack underflow at 0x{offset:X}")]
    StackUnderflow { offset: usize },

    #[error("expected {expected} on the pickle stack at 0x{offset:X}, found {actual}")]
    StackTypeMismatch {
        expected: &'static str,
        actual: String,
        offset: usize,
    },

    #[error("instance state set twice at 0x{offset:X}")]
    StateAlreadySet { offset: usize },

    #[error("`{path}` is both a file and a directory")]
    DuplicateNameConflict { path: String },

    #[error("unsupported script version {found} (expected {expected})")]
    UnsupportedScriptVersion { found: String, expected: i64 },

    #[error("script container has no decompilable chunk")]
    MissingScriptChunk,

    #[error("expected {expected}, found {actual}")]
    UnexpectedValue { expected: &'static str, actual: String },

    #[error("{class} has no `{field}` field")]
    MissingField { class: String, field: &'static str },

    #[error("unknown module `{0}`")]
    UnknownModule(String),

    #[error("unknown class `{module}.{name}`")]
    UnknownClass { module: String, name: String },

    #[error("syntax tree nested deeper than {limit} nodes")]
    NestingTooDeep { limit: usize },

    #[error("{source}\nrecently visited nodes (oldest first):\n{}", .trail.join("\n"))]
    Render {
        #[source]
        source: Box<Error>,
        trail: Vec<String>,
    },
}

impl Error {
    /// The underlying failure, looking through a [`Error::Render`] wrapper.
    pub fn root(&self) -> &Error {
        match self {
            Error::Render { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn mismatch(offset: usize, expected: &[u8], actual: &[u8]) -> Self {
        Error::FormatMismatch {
            offset,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    pub(crate) fn unexpected(expected: &'static str, actual: impl std::fmt::Display) -> Self {
        Error::UnexpectedValue {
            expected,
            actual: actual.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
