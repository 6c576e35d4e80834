use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use wplacer_protocol::Settings;

pub const DEFAULT_PORT: u16 = 39444;
pub const DEFAULT_BACKEND: &str = "https://backend.wplace.live";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: SocketAddr,
    pub backend_url: String,
    /// Session cookie sent on requests this process issues itself.
    pub cookie: Option<String>,
    /// Initial live settings; changed at runtime through the control API.
    pub settings: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            backend_url: DEFAULT_BACKEND.to_string(),
            cookie: None,
            settings: Settings::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wplacer")
            .join("config.yaml")
    }

    /// Read `path` (or the default location). A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read config: {}", path.display()));
            }
        };
        Self::parse(&raw).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut cfg: Config = serde_yaml::from_str(raw)?;
        cfg.settings.charge_limit = cfg.settings.charge_limit.max(1);
        Ok(cfg)
    }
}
