pub mod backend;
pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod normalizer;
#[cfg(feature = "server")]
pub mod server;
