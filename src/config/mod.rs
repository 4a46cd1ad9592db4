// TOML configuration for the chunking, index, retrieval and provider components

pub mod settings;


pub use settings::{Config, ConfigError, OllamaConfig};
