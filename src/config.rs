//! Configuration loading and validation.
//!
//! Two inputs:
//! - `faultline.toml`: paths, rate limit, mail transport and reporting mask
//! - `.env` beside it: the maintainer address (`MAIL_DEVS`) and `DEV_MODE`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::limiter::DEFAULT_MAX_ALERTS;
use crate::mail::sendmail::DEFAULT_SENDMAIL;
use crate::severity::SeverityMask;

/// Environment variable overriding `MAIL_DEVS`.
pub const MAIL_DEVS_ENV: &str = "FAULTLINE_MAIL_DEVS";

/// Environment variable overriding `DEV_MODE`.
pub const DEV_MODE_ENV: &str = "FAULTLINE_DEV_MODE";

/// Top-level configuration. An empty file is valid.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FaultlineConfig {
    /// Show exception detail on the failure page.
    pub debug: bool,

    /// Where logs and limiter state live.
    pub paths: PathsConfig,

    /// Alert ceiling.
    pub rate_limit: RateLimitConfig,

    /// Mail delivery.
    pub mail: MailConfig,

    /// Which fault severities are reported.
    pub reporting: ReportingConfig,
}

/// Filesystem locations.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for per-process session logs.
    pub log_dir: PathBuf,

    /// Directory for rate limiter markers. Defaults to `<log_dir>/.ratelimiter`.
    pub rate_limit_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            rate_limit_dir: None,
        }
    }
}

impl PathsConfig {
    /// Marker directory, resolving the default.
    pub fn rate_limit_dir(&self) -> PathBuf {
        self.rate_limit_dir
            .clone()
            .unwrap_or_else(|| self.log_dir.join(".ratelimiter"))
    }
}

/// Sliding-window alert ceiling.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Alerts allowed per window.
    pub max_alerts: usize,

    /// Window length in hours.
    pub window_hours: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_alerts: DEFAULT_MAX_ALERTS,
            window_hours: default_window_hours(),
        }
    }
}

impl RateLimitConfig {
    /// Window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_hours.saturating_mul(3600))
    }
}

/// Mail delivery settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Maintainer address. `MAIL_DEVS` from the secrets file wins.
    pub recipient: Option<String>,

    /// Sendmail-compatible program.
    pub sendmail_path: PathBuf,

    /// Name used in the `From` header and alert text when there is no
    /// request context.
    pub server_name: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            recipient: None,
            sendmail_path: PathBuf::from(DEFAULT_SENDMAIL),
            server_name: None,
        }
    }
}

/// Reporting mask, as severity names.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Severity names, or `"ALL"`.
    pub mask: Vec<String>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            mask: vec!["ALL".to_owned()],
        }
    }
}

impl ReportingConfig {
    /// Parsed mask.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unknown severity.
    pub fn severity_mask(&self) -> anyhow::Result<SeverityMask> {
        SeverityMask::from_names(&self.mask)
    }
}

impl FaultlineConfig {
    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.rate_limit.max_alerts >= 1,
            "rate_limit.max_alerts must be at least 1"
        );
        anyhow::ensure!(
            self.rate_limit.window_hours >= 1,
            "rate_limit.window_hours must be at least 1"
        );
        anyhow::ensure!(
            !self.paths.log_dir.as_os_str().is_empty(),
            "paths.log_dir must not be empty"
        );
        anyhow::ensure!(
            self.paths.rate_limit_dir() != self.paths.log_dir,
            "paths.rate_limit_dir must differ from paths.log_dir"
        );
        self.reporting
            .severity_mask()
            .context("invalid reporting.mask")?;
        Ok(())
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_window_hours() -> u64 {
    24
}

/// Load and validate a config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> anyhow::Result<FaultlineConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: FaultlineConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config at {}", path.display()))?;
    Ok(config)
}

/// Default config path (`<config dir>/faultline/faultline.toml`).
///
/// # Errors
///
/// Returns an error if the user's config directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let base = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine config directory"))?;
    Ok(base.config_dir().join("faultline").join("faultline.toml"))
}

/// Secrets file that sits beside `config_path`.
pub fn env_path_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map_or_else(|| PathBuf::from(".env"), |dir| dir.join(".env"))
}

/// Values kept out of the config file.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    /// Maintainer address for alerts.
    pub mail_devs: Option<String>,
    /// Development deployment; exception detail is shown to visitors.
    pub dev_mode: bool,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("mail_devs", &self.mail_devs.as_ref().map(|_| "[REDACTED]"))
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

impl Secrets {
    /// Build secrets from parsed key-value pairs.
    pub fn from_map(vars: &BTreeMap<String, String>) -> Self {
        Self {
            mail_devs: vars
                .get("MAIL_DEVS")
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty()),
            dev_mode: vars.get("DEV_MODE").is_some_and(|value| parse_flag(value)),
        }
    }

    /// Apply `FAULTLINE_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(mail) = std::env::var(MAIL_DEVS_ENV)
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
        {
            self.mail_devs = Some(mail);
        }
        if let Ok(flag) = std::env::var(DEV_MODE_ENV) {
            self.dev_mode = parse_flag(&flag);
        }
        self
    }
}

/// Load secrets from a `.env` file, then apply environment overrides.
///
/// A missing file yields empty secrets.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be parsed.
pub fn load_secrets(path: &Path) -> anyhow::Result<Secrets> {
    if !path.exists() {
        debug!(path = %path.display(), "no secrets file");
        return Ok(Secrets::default().with_env_overrides());
    }

    warn_if_shared(path);

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read secrets at {}", path.display()))?;
    for item in iter {
        let (key, value) = item.with_context(|| {
            format!("failed to parse key-value entry in secrets file {}", path.display())
        })?;
        vars.insert(key, value);
    }

    Ok(Secrets::from_map(&vars).with_env_overrides())
}

/// Effective debug flag.
pub fn debug_mode(config: &FaultlineConfig, secrets: &Secrets) -> bool {
    secrets.dev_mode || config.debug
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(unix)]
fn warn_if_shared(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(path = %path.display(), mode = %format!("{mode:o}"), "secrets file is readable by others");
        }
    }
}

#[cfg(not(unix))]
fn warn_if_shared(_path: &Path) {}
