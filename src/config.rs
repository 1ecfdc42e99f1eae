//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The renderer section exists so collaborator executables and the upload
//! directory reach the duration resolver and the render orchestrator as
//! constructor data. Business logic never reads ambient environment state.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub renderer: RendererConfig,
}

/// Server-specific configuration settings.
///
/// - `host = "127.0.0.1"`: only accept connections from localhost
/// - `host = "0.0.0.0"`: accept connections from any address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// External renderer collaborators.
///
/// ## Fields:
/// - `ffmpeg_path`: the renderer executable that realizes filter graphs
/// - `ffprobe_path`: the duration-probe executable for uploaded music
/// - `upload_dir`: where music uploads are parked for the request lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub upload_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            renderer: RendererConfig {
                // Resolved through PATH unless overridden
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
                upload_dir: env::temp_dir().to_string_lossy().into_owned(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the bare HOST and PORT variables used by deployment
    ///    platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

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
    /// - Server port is not 0
    /// - Renderer and probe executable paths are not empty
    /// - The upload directory is not empty
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.renderer.ffmpeg_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Renderer executable path cannot be empty"));
        }

        if self.renderer.ffprobe_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Probe executable path cannot be empty"));
        }

        if self.renderer.upload_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Upload directory cannot be empty"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config
    /// updates via the PUT handler).
    ///
    /// Only the fields present in the JSON change; everything else keeps its
    /// current value. For example `{"renderer": {"ffmpeg_path":
    /// "/opt/ffmpeg/bin/ffmpeg"}}` swaps the renderer binary alone.
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

        if let Some(renderer) = partial_config.get("renderer") {
            if let Some(path) = renderer.get("ffmpeg_path").and_then(|v| v.as_str()) {
                self.renderer.ffmpeg_path = path.to_string();
            }
            if let Some(path) = renderer.get("ffprobe_path").and_then(|v| v.as_str()) {
                self.renderer.ffprobe_path = path.to_string();
            }
            if let Some(dir) = renderer.get("upload_dir").and_then(|v| v.as_str()) {
                self.renderer.upload_dir = dir.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }
}
