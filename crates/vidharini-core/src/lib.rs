//! Shared types for Vidharini: errors, chat/task types and text helpers.

pub mod error;
pub mod poll;
pub mod text;
pub mod types;
