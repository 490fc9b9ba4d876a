//! # learnsync storage
//!
//! Byte-level persistence for the learnsync operation journal.
//!
//! A backend is an **append-only byte store**. It knows nothing about
//! sync operations, record framing or checksums; the journal in
//! `learnsync_engine` owns that format and uses a backend only to append
//! frames, read them back on startup and truncate the log once the queue
//! has drained.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and sessions that do not need to survive a restart
//! - [`FileBackend`] - A single journal file, locked for exclusive use by one process
//!
//! ## Example
//!
//! ```rust
//! use learnsync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
