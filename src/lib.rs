//! Translate posts, including their nested custom fields, into other
//! languages and link the results into a multilingual group.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod fields;
pub mod openai;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod security;
pub mod store;
pub mod translator;
