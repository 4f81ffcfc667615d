//! Storage layer
//!
//! File-level primitives shared by the local note store and the
//! directory-backed sync server.
//!
//! All writes that replace an existing file go through `atomic_write`
//! (temp file, fsync, rename), so readers only ever observe the old or the
//! new content.

pub mod persistence;

pub use persistence::{atomic_write, read_optional, remove_dir_if_exists, write_synced};
