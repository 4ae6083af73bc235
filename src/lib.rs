//! Per-object (channel) message-history backend: an in-memory, hash-indexed
//! collection of bounded-retention logs, an amortized cleaner that sweeps
//! the table in slices, and an optional encrypted on-disk persistence
//! layer with atomic replace and corruption quarantine.
//!
//! The crate is organized leaves-first, matching the component table this
//! design was specified against:
//!
//! - [`model`] — `LogLine`, `Tag`, query filter/result types, timestamp
//!   resolution.
//! - [`object`] — `LogObject`: the per-object line list and retention.
//! - [`index`] — the fixed-size hash table mapping object name to object.
//! - [`codec`] — the binary record format the on-disk files use.
//! - [`crypto`] — the key-derivation + authenticated-encryption envelope
//!   both database kinds are sealed with.
//! - [`persist`] — the master-DB and per-object DB I/O built on `codec` and
//!   `crypto`.
//! - [`config`] — layered configuration resolution and validation.
//! - [`error`] — the crate's typed, non-panicking error taxonomy.
//! - [`backend`] — the host-facing `HistoryBackend` tying everything
//!   together: `add`/`request`/`destroy`/`set_limit`, the cleaner tick, and
//!   the mode-char-del/rehash/capability hooks.

pub mod backend;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod index;
pub mod logging;
pub mod model;
pub mod object;
pub mod persist;

pub use backend::{HistoryBackend, PersistenceEligibility};
pub use config::{Config, ConfigOverrides};
pub use error::{Error, Result};
pub use model::{HistoryFilter, HistoryResult, LogLine, Tag};
pub use object::LogObject;
