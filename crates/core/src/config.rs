use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanlaneError};
use crate::time::parse_duration_str;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub listen_addr: String,
    pub query_addr: String,
    pub channel_capacity: usize,
    pub shrink_lanes_on_collapse: bool,
    pub idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7878".to_string(),
            query_addr: "127.0.0.1:7879".to_string(),
            channel_capacity: 256,
            shrink_lanes_on_collapse: true,
            idle_timeout: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    listen_addr: Option<String>,
    query_addr: Option<String>,
    channel_capacity: Option<usize>,
    shrink_lanes_on_collapse: Option<bool>,
    idle_timeout: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("SPANLANE_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("spanlane/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| SpanlaneError::Config(format!("failed reading {}: {e}", path.display())))?;
    parse_file_overrides(&raw)
        .map(Some)
        .map_err(|e| SpanlaneError::Config(format!("failed parsing {}: {e}", path.display())))
}

fn parse_file_overrides(raw: &str) -> std::result::Result<ConfigOverrides, toml::de::Error> {
    toml::from_str(raw)
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let channel_capacity = match env::var("SPANLANE_CHANNEL_CAPACITY") {
        Ok(v) => Some(v.parse::<usize>().map_err(|e| {
            SpanlaneError::Config(format!("bad SPANLANE_CHANNEL_CAPACITY in environment: {e}"))
        })?),
        Err(_) => None,
    };
    let shrink_lanes_on_collapse = match env::var("SPANLANE_SHRINK_LANES") {
        Ok(v) => Some(parse_bool(&v).ok_or_else(|| {
            SpanlaneError::Config(format!("bad SPANLANE_SHRINK_LANES in environment: {v}"))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        listen_addr: env::var("SPANLANE_LISTEN_ADDR").ok(),
        query_addr: env::var("SPANLANE_QUERY_ADDR").ok(),
        channel_capacity,
        shrink_lanes_on_collapse,
        idle_timeout: env::var("SPANLANE_IDLE_TIMEOUT").ok(),
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.listen_addr {
        cfg.listen_addr = v;
    }
    if let Some(v) = overrides.query_addr {
        cfg.query_addr = v;
    }
    if let Some(v) = overrides.channel_capacity {
        if v == 0 {
            return Err(SpanlaneError::Config(format!(
                "channel_capacity in {source} must be positive"
            )));
        }
        cfg.channel_capacity = v;
    }
    if let Some(v) = overrides.shrink_lanes_on_collapse {
        cfg.shrink_lanes_on_collapse = v;
    }
    if let Some(v) = overrides.idle_timeout {
        cfg.idle_timeout = Some(parse_duration_str(&v).map_err(|e| {
            SpanlaneError::Config(format!("bad idle_timeout in {source}: {e}"))
        })?);
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
