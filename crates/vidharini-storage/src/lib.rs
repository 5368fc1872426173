//! Storage and persistence domain for Vidharini.

pub mod db;
pub mod memory;
pub mod status_store;
