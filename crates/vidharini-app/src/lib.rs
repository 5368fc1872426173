//! Process-level helpers for the Vidharini binary: log setup and the
//! speech-to-text provider client.

pub mod logging;
pub mod transcribe;
