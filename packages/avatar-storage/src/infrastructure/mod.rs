//! Infrastructure layer - Storage adapters
//!
//! - SQLite job store (feature `sqlite`)
//! - S3 object store (feature `s3`)
//! - In-memory job and object stores (always available)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "s3")]
pub mod s3;

pub use memory::{InMemoryJobStore, InMemoryObjectStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;

#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};
