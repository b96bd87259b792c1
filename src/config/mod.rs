/// Database configuration and connection management
pub mod database;

/// Points, transport mode, reward and badge settings from config.toml
pub mod settings;
