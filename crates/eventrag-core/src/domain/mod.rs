//! Domain layer
//!
//! Event model, store ports, and the four engine components.

pub mod coordinator;
pub mod embedding;
pub mod enhancement;
pub mod event;
pub mod patterns;
pub mod retrieval;
pub mod store;
