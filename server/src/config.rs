use std::net::SocketAddr;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_PERSONA_ID: &str = "default";

/// Effective settings from `.env` and the process environment. CLI flags
/// override these in `main`.
#[derive(Debug, Clone)]
pub struct Config {
	pub bind: SocketAddr,
	pub data_dir: String,
	pub default_persona_id: String,
}

impl Config {
	pub fn load() -> anyhow::Result<Self> {
		let _ = dotenvy::dotenv();
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
		let port = get("PORT").and_then(|p| p.parse::<u16>().ok());
		let bind = if let Some(p) = port { format!("127.0.0.1:{}", p) } else { get("HTTP_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()) };
		let bind: SocketAddr = bind.parse()?;
		let data_dir = get("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
		let default_persona_id = get("DEFAULT_PERSONA_ID").filter(|s| !s.trim().is_empty()).unwrap_or_else(|| DEFAULT_PERSONA_ID.to_string());
		Ok(Self { bind, data_dir, default_persona_id })
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
			data_dir: DEFAULT_DATA_DIR.to_string(),
			default_persona_id: DEFAULT_PERSONA_ID.to_string(),
		}
	}
}
