//! Agent configuration management
//!
//! The configuration document is JSON: a `global` defaults block plus an
//! optional `devices` map keyed by device identity (the `Id` read from a
//! mounted device's descriptor file). Each device block may override a subset
//! of the global keys; the overlay is key-by-key, no deep merge.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Global defaults, applied to every session
    #[serde(default)]
    pub global: GlobalSettings,
    /// Per-device overrides keyed by device identity
    #[serde(default)]
    pub devices: HashMap<String, DeviceOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "GlobalSettings::default_log_level")]
    pub log_level: String,
    /// Optional log file; console-only when absent
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Idle poll interval in seconds
    #[serde(default = "GlobalSettings::default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Where block devices get mounted
    #[serde(default = "GlobalSettings::default_mount_point")]
    pub mount_point: PathBuf,
    /// Activity directory on the mounted device, relative to the mount point
    #[serde(default = "GlobalSettings::default_activity_src_dir")]
    pub activity_src_dir: String,
    /// Local directory activities are synced into
    #[serde(default = "GlobalSettings::default_activity_dest_dir")]
    pub activity_dest_dir: PathBuf,
    /// Activity type written into the import manifest
    #[serde(default = "GlobalSettings::default_activity_type")]
    pub activity_type: String,
    /// Path of the sqlite dedup store
    #[serde(default = "GlobalSettings::default_db_path")]
    pub db_path: PathBuf,
    /// Staging path for the import manifest
    #[serde(default = "GlobalSettings::default_import_file")]
    pub import_file: PathBuf,
    /// Garmin Connect user
    #[serde(default)]
    pub user: Option<String>,
    /// Garmin Connect credential
    #[serde(default)]
    pub password: Option<String>,
    /// USB device filters (VID:PID patterns, e.g. "0x091e:*")
    #[serde(default = "GlobalSettings::default_device_filters")]
    pub device_filters: Vec<String>,
    /// Upper bound on every external invocation (mount, rsync, uploader)
    #[serde(default = "GlobalSettings::default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl GlobalSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_poll_interval() -> u64 {
        1
    }

    fn default_mount_point() -> PathBuf {
        PathBuf::from("/mnt")
    }

    fn default_activity_src_dir() -> String {
        "Garmin/Activities".to_string()
    }

    fn default_activity_dest_dir() -> PathBuf {
        PathBuf::from("Activities")
    }

    fn default_activity_type() -> String {
        "uncategorized".to_string()
    }

    fn default_db_path() -> PathBuf {
        PathBuf::from("garminconnect.db")
    }

    fn default_import_file() -> PathBuf {
        PathBuf::from("/tmp/import_activities.csv")
    }

    fn default_device_filters() -> Vec<String> {
        // Garmin International's vendor id
        vec!["0x091e:*".to_string()]
    }

    fn default_command_timeout() -> u64 {
        300
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            log_file: None,
            poll_interval_secs: Self::default_poll_interval(),
            mount_point: Self::default_mount_point(),
            activity_src_dir: Self::default_activity_src_dir(),
            activity_dest_dir: Self::default_activity_dest_dir(),
            activity_type: Self::default_activity_type(),
            db_path: Self::default_db_path(),
            import_file: Self::default_import_file(),
            user: None,
            password: None,
            device_filters: Self::default_device_filters(),
            command_timeout_secs: Self::default_command_timeout(),
        }
    }
}

/// Per-device override block
///
/// Every field is optional; a present field replaces the corresponding global
/// value for the session, an absent one leaves the default untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceOverrides {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub mount_point: Option<PathBuf>,
    #[serde(default)]
    pub activity_src_dir: Option<String>,
    #[serde(default)]
    pub activity_dest_dir: Option<PathBuf>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub import_file: Option<PathBuf>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Configuration in effect for one device session
///
/// Recomputed fresh at the start of every session; never persisted and never
/// written back into the global defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub poll_interval_secs: u64,
    pub mount_point: PathBuf,
    pub activity_src_dir: String,
    pub activity_dest_dir: PathBuf,
    pub activity_type: String,
    pub import_file: PathBuf,
    pub user: Option<String>,
    pub password: Option<String>,
    pub command_timeout_secs: u64,
}

impl AgentConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/garmin-agent/config.json"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: AgentConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.expand_paths();
        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("garmin-agent").join("config.json")
        } else {
            PathBuf::from(".config/garmin-agent/config.json")
        }
    }

    /// Resolve the configuration in effect for a session.
    ///
    /// If the device identity has an override block, its keys replace the
    /// corresponding global values one by one. A missing identity, or an
    /// identity with no override block, yields the global defaults.
    pub fn effective(&self, identity: Option<&str>) -> EffectiveConfig {
        let g = &self.global;
        let mut effective = EffectiveConfig {
            poll_interval_secs: g.poll_interval_secs,
            mount_point: g.mount_point.clone(),
            activity_src_dir: g.activity_src_dir.clone(),
            activity_dest_dir: g.activity_dest_dir.clone(),
            activity_type: g.activity_type.clone(),
            import_file: g.import_file.clone(),
            user: g.user.clone(),
            password: g.password.clone(),
            command_timeout_secs: g.command_timeout_secs,
        };

        let Some(overrides) = identity.and_then(|id| self.devices.get(id)) else {
            return effective;
        };

        if let Some(v) = overrides.poll_interval_secs {
            effective.poll_interval_secs = v;
        }
        if let Some(v) = &overrides.mount_point {
            effective.mount_point = v.clone();
        }
        if let Some(v) = &overrides.activity_src_dir {
            effective.activity_src_dir = v.clone();
        }
        if let Some(v) = &overrides.activity_dest_dir {
            effective.activity_dest_dir = v.clone();
        }
        if let Some(v) = &overrides.activity_type {
            effective.activity_type = v.clone();
        }
        if let Some(v) = &overrides.import_file {
            effective.import_file = v.clone();
        }
        if let Some(v) = &overrides.user {
            effective.user = Some(v.clone());
        }
        if let Some(v) = &overrides.password {
            effective.password = Some(v.clone());
        }

        effective
    }

    /// Expand `~` in user-supplied paths
    fn expand_paths(&mut self) {
        for path in [
            &mut self.global.mount_point,
            &mut self.global.activity_dest_dir,
            &mut self.global.db_path,
            &mut self.global.import_file,
        ] {
            *path = expand_tilde(path);
        }
        if let Some(log_file) = &mut self.global.log_file {
            *log_file = expand_tilde(log_file);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.global.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.global.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.global.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be greater than 0"));
        }

        if self.global.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be greater than 0"));
        }

        for filter in &self.global.device_filters {
            Self::validate_filter(filter)?;
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x091e:*')",
                filter
            ));
        }

        for (id, name) in [(parts[0], "VID"), (parts[1], "PID")] {
            if id != "*" {
                Self::validate_hex_id(id, name)?;
            }
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        if !id.starts_with("0x") && !id.starts_with("0X") {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x091e')",
                name,
                id
            ));
        }

        let hex_part = &id[2..];
        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.poll_interval_secs, 1);
        assert_eq!(config.global.mount_point, PathBuf::from("/mnt"));
        assert_eq!(config.global.activity_src_dir, "Garmin/Activities");
        assert_eq!(config.global.activity_type, "uncategorized");
        assert_eq!(config.global.device_filters, vec!["0x091e:*"]);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_overlay_replaces_overridden_keys_only() {
        let json = r#"{
            "global": { "poll_interval_secs": 5, "activity_type": "cycling" },
            "devices": {
                "3907633405": { "poll_interval_secs": 10, "user": "edge-user" }
            }
        }"#;
        let config: AgentConfig = serde_json::from_str(json).unwrap();

        let effective = config.effective(Some("3907633405"));
        assert_eq!(effective.poll_interval_secs, 10);
        assert_eq!(effective.user.as_deref(), Some("edge-user"));
        // Unrelated defaults are unaffected
        assert_eq!(effective.activity_type, "cycling");
        assert_eq!(effective.mount_point, PathBuf::from("/mnt"));
    }

    #[test]
    fn test_overlay_never_mutates_globals() {
        let json = r#"{
            "global": { "poll_interval_secs": 5 },
            "devices": { "dev": { "poll_interval_secs": 10 } }
        }"#;
        let config: AgentConfig = serde_json::from_str(json).unwrap();

        let _ = config.effective(Some("dev"));
        assert_eq!(config.global.poll_interval_secs, 5);
    }

    #[test]
    fn test_overlay_without_identity_yields_defaults() {
        let json = r#"{
            "global": { "poll_interval_secs": 5 },
            "devices": { "dev": { "poll_interval_secs": 10 } }
        }"#;
        let config: AgentConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.effective(None).poll_interval_secs, 5);
        assert_eq!(config.effective(Some("unknown")).poll_interval_secs, 5);
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(AgentConfig::validate_filter("0x091e:*").is_ok());
        assert!(AgentConfig::validate_filter("0x091e:0x0003").is_ok());
        assert!(AgentConfig::validate_filter("*:0x0003").is_ok());
        assert!(AgentConfig::validate_filter("*:*").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(AgentConfig::validate_filter("091e:0003").is_err());
        assert!(AgentConfig::validate_filter("0x091e").is_err());
        assert!(AgentConfig::validate_filter("0x091e:0x1:0x2").is_err());
        assert!(AgentConfig::validate_filter("0xZZZZ:*").is_err());
        assert!(AgentConfig::validate_filter("0x12345:*").is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = AgentConfig::default();
        assert!(config.validate().is_ok());

        config.global.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.global.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = AgentConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AgentConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.global.log_level, parsed.global.log_level);
        assert_eq!(config.global.db_path, parsed.global.db_path);
    }
}
