//! Port for the external reasoning collaborator (LLM backends).

pub mod client;
pub mod types;
