//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **struct**: Custom data types that group related fields together
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, engine, performance)
/// makes it easier to understand and maintain as the application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech recognition engine configuration.
///
/// ## Fields:
/// - `model_path`: Filesystem path to the whisper model weights. The model
///   is loaded once at startup; there is no download or caching layer here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub model_path: String,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_transcriptions`: Process-wide cap on simultaneous engine
///   invocations, across all connected sessions
/// - `max_payload_bytes`: Upper bound on one reassembled audio payload
///
/// ## Tuning guidelines:
/// - Higher concurrency: more parallel clients served, but the engine is
///   CPU- and memory-hungry; size this to the machine
/// - Larger payloads: longer utterances per message, more memory per session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_transcriptions: usize,
    pub max_payload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(), // Localhost only (safe for development)
                port: 8080,
            },
            engine: EngineConfig {
                model_path: "models/ggml-base.bin".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_transcriptions: 2, // Whisper saturates cores quickly
                max_payload_bytes: 10 * 1024 * 1024, // 10 MiB, roughly 5 minutes of 16kHz WAV
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_ENGINE_MODEL_PATH=/models/ggml-small.bin`: Override model path
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            // Example: APP_SERVER_HOST becomes server.host in the config
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Handle special environment variables used by deployment platforms
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0 (port 0 is reserved and can't be used)
    /// - The engine concurrency cap admits at least one transcription
    /// - The payload limit is not zero (every payload would be rejected)
    /// - A model path is actually configured
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_transcriptions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent transcriptions must be greater than 0"
            ));
        }

        if self.performance.max_payload_bytes == 0 {
            return Err(anyhow::anyhow!("Max payload bytes must be greater than 0"));
        }

        if self.engine.model_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Engine model path cannot be empty"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// This method allows updating only some fields, not the entire
    /// configuration. For example, `{"performance": {"max_payload_bytes":
    /// 1048576}}` changes only the payload limit. Server and engine settings
    /// are applied to the stored configuration but only take effect for
    /// components that read them per request.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(engine) = partial_config.get("engine") {
            if let Some(model_path) = engine.get("model_path").and_then(|v| v.as_str()) {
                self.engine.model_path = model_path.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(concurrent) = performance
                .get("max_concurrent_transcriptions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_transcriptions = concurrent as usize;
            }
            if let Some(bytes) = performance.get("max_payload_bytes").and_then(|v| v.as_u64()) {
                self.performance.max_payload_bytes = bytes as usize;
            }
        }

        // Validate the updated configuration to ensure it's still valid
        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        // Ensure the default config passes validation
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0; // Invalid port
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_transcriptions = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.model_path = "   ".to_string();
        assert!(config.validate().is_err());
    }

    /// Test that runtime configuration updates work correctly.
    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"performance": {"max_payload_bytes": 1048576}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.performance.max_payload_bytes, 1048576);
        // Other fields should remain unchanged
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.performance.max_concurrent_transcriptions, 2);
    }

    /// Test that updates which would break the server are rejected.
    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        let json = r#"{"performance": {"max_concurrent_transcriptions": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
