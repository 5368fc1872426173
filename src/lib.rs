pub mod config;
pub mod embedding;
pub mod llm;
pub mod memory_extract;
pub mod ocr;
pub mod poller;
pub mod queue;
pub mod rag;
pub mod runtime;
pub mod tasks;
pub mod transcription;
pub mod web;

pub use vidharini_app::logging;
pub use vidharini_app::transcribe;
pub use vidharini_core::error;
pub use vidharini_core::poll;
pub use vidharini_core::text;
pub use vidharini_core::types;
pub use vidharini_storage::db;
pub use vidharini_storage::memory;
pub use vidharini_storage::status_store;
