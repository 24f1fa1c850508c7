use thiserror::Error;

/// Errors produced by mapping parsing, transformation, and remapping.
#[derive(Error, Debug)]
pub enum Error {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("{0}")]
    Invariant(String),
    #[error("namespace {0:?} not present in mappings")]
    NamespaceMissing(String),
    #[error("malformed descriptor {0:?}")]
    Descriptor(String),
    #[error("malformed class file: {0}")]
    ClassFile(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [Error], independent of its payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Parse,
    Invariant,
    NamespaceMissing,
    Descriptor,
    ClassFile,
    Io,
}

impl Error {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Invariant(_) => ErrorKind::Invariant,
            Error::NamespaceMissing(_) => ErrorKind::NamespaceMissing,
            Error::Descriptor(_) => ErrorKind::Descriptor,
            Error::ClassFile(_) => ErrorKind::ClassFile,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// 1-based input line for parse errors.
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
