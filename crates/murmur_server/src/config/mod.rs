#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

/// Default outbound queue depth per connection.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Default config path: `~/.murmur/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".murmur").join("config.toml"))
}

/// Load the server config from TOML, then apply `MURMUR_*` env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Accepted websocket `Origin` values. Empty allows any origin.
	pub allowed_origins: Vec<String>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	pub outbound_queue_capacity: usize,
	pub max_frame_bytes: usize,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			allowed_origins: Vec::new(),
			metrics_bind: None,
			health_bind: None,
			outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
			max_frame_bytes: murmur_protocol::DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// `sqlite:` URL. Unset keeps everything in memory.
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	#[serde(default)]
	allowed_origins: Vec<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	outbound_queue_capacity: Option<usize>,
	max_frame_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerSettings::default();
		Self {
			server: ServerSettings {
				allowed_origins: clean_origins(file.server.allowed_origins),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				outbound_queue_capacity: file
					.server
					.outbound_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.outbound_queue_capacity),
				max_frame_bytes: file
					.server
					.max_frame_bytes
					.filter(|v| *v > 0)
					.unwrap_or(defaults.max_frame_bytes),
			},
			persistence: PersistenceSettings {
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

fn clean_origins<I: IntoIterator<Item = String>>(origins: I) -> Vec<String> {
	origins
		.into_iter()
		.map(|o| o.trim().trim_end_matches('/').to_string())
		.filter(|o| !o.is_empty())
		.collect()
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	if let Some(v) = env("MURMUR_ALLOWED_ORIGINS") {
		cfg.server.allowed_origins = clean_origins(v.split(',').map(str::to_string));
		info!(
			count = cfg.server.allowed_origins.len(),
			"server config: allowed_origins overridden by env"
		);
	}

	if let Some(v) = env("MURMUR_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Some(v) = env("MURMUR_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Some(v) = env("MURMUR_OUTBOUND_QUEUE_CAPACITY") {
		match v.trim().parse::<usize>() {
			Ok(capacity) if capacity > 0 => {
				cfg.server.outbound_queue_capacity = capacity;
				info!(capacity, "server config: outbound_queue_capacity overridden by env");
			}
			_ => warn!(value = %v, "server config: ignoring invalid MURMUR_OUTBOUND_QUEUE_CAPACITY"),
		}
	}

	if let Some(v) = env("MURMUR_MAX_FRAME_BYTES") {
		match v.trim().parse::<usize>() {
			Ok(bytes) if bytes > 0 => {
				cfg.server.max_frame_bytes = bytes;
				info!(bytes, "server config: max_frame_bytes overridden by env");
			}
			_ => warn!(value = %v, "server config: ignoring invalid MURMUR_MAX_FRAME_BYTES"),
		}
	}

	if let Some(v) = env("MURMUR_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}
}
