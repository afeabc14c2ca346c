//! Content Forge: AI social content generation with subscription billing.

pub mod api;
pub mod billing;
pub mod config;
pub mod content;
pub mod error;
pub mod llm;
pub mod store;
