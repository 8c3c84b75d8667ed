use std::fmt;
use std::io;

use crate::harness::ThreadRole;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    InvalidConfig(String),
    Spawn {
        role: ThreadRole,
        index: usize,
        source: io::Error,
    },
    Join {
        role: ThreadRole,
        index: usize,
        reason: String,
    },
    Exhausted(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Error::Spawn { role, index, source } => {
                write!(f, "failed to spawn {} thread {}: {}", role, index, source)
            }
            Error::Join { role, index, reason } => {
                write!(f, "failed to join {} thread {}: {}", role, index, reason)
            }
            Error::Exhausted(msg) => write!(f, "resource exhausted: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
