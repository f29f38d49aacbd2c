//! Configuration loading from TOML.
//!
//! Reads `powa.toml` (or the file named by `POWA_CONFIG`) and deserializes
//! it into strongly-typed structs. Every field has a default, so a missing
//! file or a partial file both work.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "powa.toml";

/// Environment variable that overrides the config file path.
pub const CONFIG_ENV: &str = "POWA_CONFIG";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub forge: ForgeConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Front-end page served at `/`.
    pub index_path: PathBuf,
    /// How long to wait for in-flight streams after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            index_path: PathBuf::from("powa-model.html"),
            shutdown_grace_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ForgeConfig {
    /// Executable to run, looked up on `PATH` when not a path.
    pub program: String,
    /// Extra arguments placed before the `test` subcommand.
    pub program_args: Vec<String>,
    /// Contract passed to `--match-contract`.
    pub contract: String,
    /// Directory the test process runs in; relative paths below resolve here.
    pub working_dir: PathBuf,
    /// Where the posted simulation config is written for the test to read.
    pub config_path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            program: "forge".to_string(),
            program_args: Vec::new(),
            contract: "ParameterizedPOWATest".to_string(),
            working_dir: PathBuf::from("."),
            config_path: PathBuf::from("test/powa-config.json"),
            timeout_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load from `POWA_CONFIG` or `powa.toml`, falling back to defaults when
    /// the file does not exist. A file that exists but fails to parse is
    /// still an error.
    pub fn load_or_default() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        if Path::new(&path).exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address: {}:{}", self.host, self.port))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl ForgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Make `working_dir` absolute and resolve `config_path` against it.
    pub fn resolve(mut self, base: &Path) -> Self {
        if self.working_dir.is_relative() {
            self.working_dir = base.join(&self.working_dir);
        }
        if self.config_path.is_relative() {
            self.config_path = self.working_dir.join(&self.config_path);
        }
        self
    }
}
