//! Command handlers

pub mod config;
pub mod note;
pub mod status;
pub mod sync;
