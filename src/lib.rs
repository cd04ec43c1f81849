//! recipe-adjust - turns cooking feedback into versioned recipe variations.
//!
//! Feedback on a saved recipe is interpreted into taste-axis adjustments,
//! grounded in the user's profile and cooking knowledge, planned and
//! generated through a chain of text-generation providers, validated, and
//! committed as a new active variation that can later be rolled back.

pub mod cli;
pub mod collaborators;
pub mod config;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod server;
#[doc(hidden)]
pub mod testkit;
pub mod versions;

#[cfg(test)]
mod testing;
