//! Registry-backed pointer handles for debug-mode memory tracking.
//!
//! [`Handle<T>`] behaves as a plain pointer under most conditions. Built
//! with the `track` feature (the default), every handle additionally
//! routes its lifetime and accesses through a [`Registry`], which detects
//! use-after-free, double free, dangling dereference, out-of-bounds array
//! indexing, and pointer leaks at the moment they happen. With the
//! feature disabled the same surface compiles down to a bare raw pointer
//! with no bookkeeping. This crate necessarily contains `unsafe` code;
//! every unsafe block carries a `// SAFETY:` comment.
//!
//! # Architecture
//!
//! ```text
//! Registry (explicit, clonable alias of one shared table)
//! └── Tables
//!     ├── addr_ids: IndexMap<usize, RecordId>   (address → current record)
//!     └── records:  Vec<Record>                 (ids stable, never reused;
//!                                                tombstones kept for leaks)
//! Handle<T> (value type: raw pointer + optional registry link)
//! ├── construct/clone/drop/delete  → register/retain/release/mark-deleted
//! └── deref/index/cast/raw escape  → liveness and bounds validation
//! ```
//!
//! The registry is the single source of truth for liveness and aliasing;
//! handles are thin capability tokens. Two handles that share an address
//! without knowing about each other still agree on liveness, because they
//! consult the same table.
//!
//! # Faults
//!
//! Every fault is a contract violation by the calling code, so there is
//! nothing to recover: violations panic at the point of detection with a
//! [`Violation`] payload naming the record, address, and operation. See
//! the [`error`] module for the taxonomy.
//!
//! # Threading
//!
//! The tracking discipline is single-threaded. [`Registry`] and every
//! linked [`Handle`] are `!Send`/`!Sync` by construction, so misuse is a
//! compile error rather than a data race.
//!
//! # Examples
//!
//! ```
//! use tether::{Handle, Registry};
//!
//! let registry = Registry::new();
//!
//! let mut scores: Handle<u32> = Handle::new_array_in(&registry, 5);
//! scores[4] = 97;
//!
//! let alias = scores.clone();
//! assert_eq!(alias[4], 97);
//!
//! drop(alias);
//! scores.delete_array();
//! assert_eq!(registry.leak_count(), 0);
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
mod record;
pub mod view;

#[cfg(feature = "track")]
mod handle;
#[cfg(feature = "track")]
mod registry;

#[cfg(not(feature = "track"))]
mod bare;

// Public re-exports for the primary API surface.
pub use config::RegistryConfig;
pub use error::Violation;
pub use record::{RecordId, RecordStatus};
pub use view::ViewAs;

#[cfg(feature = "track")]
pub use handle::Handle;
#[cfg(feature = "track")]
pub use registry::Registry;

#[cfg(not(feature = "track"))]
pub use bare::{Handle, Registry};
