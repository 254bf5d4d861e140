//! Hierarchical process configuration (spec §6, SPEC_FULL §10.3).
//!
//! Loaded from TOML via `serde`, layered with the `config` crate so a
//! deployment can override file values with environment variables
//! (`FEEDHANDLER__<VENUE>__...`), the nearest TOML-native equivalent of the
//! original's named child config blocks
//! (`examples/original_source/common/fh_config.h`).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub address: String,
    pub port: u16,
    pub interface: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineConfig {
    pub primary: EndpointConfig,
    pub secondary: Option<EndpointConfig>,
    pub login: Option<LoginConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub cpu: Option<u32>,
    #[serde(default)]
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FillGapsConfig {
    #[serde(default)]
    pub max: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for FillGapsConfig {
    fn default() -> Self {
        Self {
            max: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub size: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    #[serde(default)]
    pub processes: HashMap<String, ProcessConfig>,
    #[serde(default)]
    pub lines: HashMap<String, LineConfig>,
    #[serde(default)]
    pub fill_gaps: FillGapsConfig,
    #[serde(default)]
    pub symbol_table: TableConfig,
    #[serde(default)]
    pub order_table: TableConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    #[serde(flatten)]
    pub venues: HashMap<String, VenueConfig>,
}

impl RootConfig {
    /// Loads the TOML config file, then layers environment-variable
    /// overrides on top (`FEEDHANDLER__<VENUE>__...`) via the `config` crate,
    /// the pack's idiom for layered file+env configuration (SPEC_FULL §10.3).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("FEEDHANDLER").separator("__"))
            .build()
            .map_err(|source| ConfigError::Load {
                path: path.display().to_string(),
                source,
            })?;
        settings.try_deserialize().map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })
    }

    /// Resolve the process block named by `-p <process>` (spec §6); falls
    /// back to the sole configured process if there is exactly one and none
    /// was named.
    pub fn resolve_process<'a>(
        &'a self,
        venue: &str,
        process_name: Option<&str>,
    ) -> Result<(&'a str, &'a ProcessConfig), ConfigError> {
        let venue_cfg = self
            .venues
            .get(venue)
            .ok_or_else(|| ConfigError::UnknownProcess(venue.to_string()))?;

        match process_name {
            Some(name) => venue_cfg
                .processes
                .get_key_value(name)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| ConfigError::UnknownProcess(name.to_string())),
            None => {
                if venue_cfg.processes.len() == 1 {
                    let (name, cfg) = venue_cfg.processes.iter().next().expect("len == 1");
                    Ok((name.as_str(), cfg))
                } else {
                    Err(ConfigError::NoProcess)
                }
            }
        }
    }

    /// Resolve `-p <process>` without requiring the caller to already know
    /// which `<venue>` block it lives in (spec §6's CLI has no `--venue`
    /// flag; the process name is looked up across every configured venue).
    /// Falls back to the sole configured process across all venues if none
    /// was named and there is exactly one.
    pub fn resolve_process_any<'a>(
        &'a self,
        process_name: Option<&str>,
    ) -> Result<(&'a str, &'a str, &'a ProcessConfig), ConfigError> {
        let mut matches: Vec<(&str, &str, &ProcessConfig)> = Vec::new();
        for (venue, venue_cfg) in &self.venues {
            for (name, proc_cfg) in &venue_cfg.processes {
                if process_name.map_or(true, |n| n == name) {
                    matches.push((venue.as_str(), name.as_str(), proc_cfg));
                }
            }
        }
        match (process_name, matches.len()) {
            (Some(name), 0) => Err(ConfigError::UnknownProcess(name.to_string())),
            (None, 0) => Err(ConfigError::NoProcess),
            (_, 1) => Ok(matches.remove(0)),
            (Some(name), _) => Err(ConfigError::UnknownProcess(name.to_string())),
            (None, _) => Err(ConfigError::NoProcess),
        }
    }

    pub fn line<'a>(&'a self, venue: &str, line_name: &str) -> Result<&'a LineConfig, ConfigError> {
        self.venues
            .get(venue)
            .and_then(|v| v.lines.get(line_name))
            .ok_or_else(|| ConfigError::UnknownConnection {
                line: line_name.to_string(),
                conn: "primary",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [pitch.processes.main]
        cpu = 2
        lines = ["A"]

        [pitch.lines.A.primary]
        address = "224.0.1.1"
        port = 30001
        interface = "eth0"
        enabled = true

        [pitch.fill_gaps]
        max = 1024
        timeout_secs = 5

        [pitch.symbol_table]
        enabled = true
        size = 8192

        [pitch.order_table]
        enabled = true
        size = 65536
    "#;

    #[test]
    fn parses_nested_venue_shape() {
        let root: RootConfig = toml::from_str(SAMPLE).unwrap();
        let venue = root.venues.get("pitch").unwrap();
        assert_eq!(venue.fill_gaps.max, 1024);
        assert!(venue.symbol_table.enabled);
        let line = venue.lines.get("A").unwrap();
        assert_eq!(line.primary.port, 30001);
    }

    #[test]
    fn resolve_process_by_name() {
        let root: RootConfig = toml::from_str(SAMPLE).unwrap();
        let (name, cfg) = root.resolve_process("pitch", Some("main")).unwrap();
        assert_eq!(name, "main");
        assert_eq!(cfg.cpu, Some(2));
    }

    #[test]
    fn resolve_process_falls_back_when_sole_process() {
        let root: RootConfig = toml::from_str(SAMPLE).unwrap();
        let (name, _) = root.resolve_process("pitch", None).unwrap();
        assert_eq!(name, "main");
    }

    #[test]
    fn unknown_process_is_reported() {
        let root: RootConfig = toml::from_str(SAMPLE).unwrap();
        assert!(matches!(
            root.resolve_process("pitch", Some("missing")),
            Err(ConfigError::UnknownProcess(_))
        ));
    }

    #[test]
    fn resolve_process_any_finds_process_across_venues() {
        let root: RootConfig = toml::from_str(SAMPLE).unwrap();
        let (venue, name, _) = root.resolve_process_any(Some("main")).unwrap();
        assert_eq!(venue, "pitch");
        assert_eq!(name, "main");
    }

    #[test]
    fn zero_fill_gaps_max_disables_gap_tracking() {
        let root: RootConfig = toml::from_str(SAMPLE).unwrap();
        let venue = root.venues.get("pitch").unwrap();
        let mut disabled = venue.fill_gaps.clone();
        disabled.max = 0;
        assert_eq!(disabled.max, 0);
    }
}
