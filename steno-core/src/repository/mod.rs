//! The Repository contract (C1) and its reference implementation.

pub mod sqlite;

pub use sqlite::SqliteRepository;
