//! Named POSIX shared memory
//!
//! A [`MappedRegion`] puts a [`SharedRegion`](crate::disruptor::SharedRegion)
//! into a segment other processes can open by name. The creating process
//! places the region with `init_in_place`; every other process maps the same
//! segment, wherever its kernel decides, and attaches to it.
//!
//! ```no_run
//! use shmcast::disruptor::BusySpin;
//! use shmcast::ipc::{Creator, MappedRegion, Opener};
//!
//! // Writer process
//! let region = MappedRegion::<u64, 1024, 8, Creator>::create("/quotes")?;
//! let mut producer = region.open_writer(BusySpin)?;
//!
//! // Reader process
//! let region = MappedRegion::<u64, 1024, 8, Opener>::open("/quotes")?;
//! let mut consumer = region.join(BusySpin)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod mapping;

pub use mapping::{Creator, MappedRegion, Mapping, MappingMode, Opener};

use rustix::io::Errno;
use thiserror::Error;

/// Result alias for shared memory operations
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors raised while creating or opening a segment
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("invalid shared memory name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("{op} failed for `{name}`: {source}")]
    Posix {
        op: &'static str,
        name: String,
        #[source]
        source: Errno,
    },

    #[error("shared memory `{name}` holds {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: i64,
    },
}

impl ShmError {
    fn posix(op: &'static str, name: &str, source: Errno) -> Self {
        Self::Posix {
            op,
            name: name.to_string(),
            source,
        }
    }

    /// The errno behind a failed system call, if that is what failed
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Posix { source, .. } => Some(*source),
            _ => None,
        }
    }
}
