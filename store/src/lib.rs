//! Object store contract.
//!
//! The transport core hands completed big objects to an [`ObjectStore`] and
//! never implements persistence itself. Backends (file, database, in-memory)
//! implement these traits; the rest of the workspace depends only on the
//! traits. [`MemoryStore`] is the in-process backend the daemon runs with.

pub mod error;
pub mod memory;
pub mod meta;
pub mod object;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use meta::{decode_metadata, encode_metadata, MetadataStore};
pub use object::ObjectStore;
