//! Shared helpers.

pub mod prompts;
