//! Core domain + decision pipeline for the community moderation bot.
//!
//! This crate is framework-agnostic. Telegram and the Gemini reasoning backend
//! live behind ports (traits) implemented in adapter crates.

pub mod audit;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod filters;
pub mod formatting;
pub mod history;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod pipeline;
pub mod quota;
pub mod reasoning;

pub use errors::{Error, Result};
