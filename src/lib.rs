pub mod client;
pub mod config;
pub mod core;
pub mod detection;
pub mod health;
pub mod prompt;
pub mod providers;
pub mod registry;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{CompletionClient, CompletionClientBuilder};
pub use core::types::*;
