//! Layered configuration.
//!
//! Values are merged from lowest to highest precedence:
//! 1. built-in defaults,
//! 2. the config file (TOML, YAML or JSON, picked by extension),
//! 3. environment variables prefixed with `FANOUT_`, nested keys separated by
//!    `__` (`FANOUT_DESTINATIONS__R2__BUCKET=screenshots`).
//!
//! ```toml
//! enabled = ["local", "r2"]
//! background = ["weibo"]
//! flush_interval_ms = 100
//!
//! [destinations.local]
//! directory = "/srv/mirror"
//! base_url = "https://cdn.example.com"
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use fanout_destination::{DestinationId, DestinationSettings};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

pub const ENV_PREFIX: &str = "FANOUT_";
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;
pub const MIN_FLUSH_INTERVAL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Destinations selected when the caller doesn't pick any.
    pub enabled: Vec<DestinationId>,
    /// Destinations that keep running in the background once an upload has
    /// been decided.
    pub background: Vec<DestinationId>,
    pub flush_interval_ms: u64,
    /// Settings object per destination id, passed to the adapter untouched.
    pub destinations: BTreeMap<DestinationId, Value>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            background: Vec::new(),
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            destinations: BTreeMap::new(),
        }
    }
}

impl Config {
    /// `config.toml` in the platform's config directory for this application.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "fanout").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from [`Config::default_path()`] when it exists.
    ///
    /// An explicit path that doesn't exist is an error. A missing default
    /// file is not: defaults and the environment still apply.
    #[instrument("loading configuration")]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match path {
            Some(path) if !path.exists() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => figment = merge_file(figment, path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => figment = merge_file(figment, &path)?,
                _ => tracing::debug!("No config file found, using defaults and environment"),
            },
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_interval_ms < MIN_FLUSH_INTERVAL_MS {
            exn::bail!(ErrorKind::Invalid(format!(
                "flush_interval_ms must be at least {MIN_FLUSH_INTERVAL_MS}, got {}",
                self.flush_interval_ms
            )));
        }
        for (list, ids) in [("enabled", &self.enabled), ("background", &self.background)] {
            if ids.iter().any(|id| id.as_str().trim().is_empty()) {
                exn::bail!(ErrorKind::Invalid(format!("`{list}` contains an empty destination id")));
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> DestinationSettings {
        self.destinations.iter().map(|(id, settings)| (id.clone(), settings.clone())).collect()
    }

    pub fn enabled(&self) -> &[DestinationId] {
        &self.enabled
    }

    pub fn background(&self) -> &[DestinationId] {
        &self.background
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    tracing::debug!(path = %path.display(), "Loading configuration file");
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;
    use serde_json::json;

    // Every test that reads the environment runs inside a `Jail`, which holds
    // a global lock and restores the environment and working directory after.
    fn jailed(test: impl FnOnce(&mut Jail) -> figment::error::Result<()>) {
        Jail::expect_with(|jail| {
            jail.clear_env();
            test(jail)
        });
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.flush_interval(), Duration::from_millis(100));
        assert!(config.enabled().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml() {
        jailed(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                enabled = ["local", "r2"]
                background = ["weibo"]
                flush_interval_ms = 50

                [destinations.local]
                directory = "/srv/mirror"

                [destinations.r2]
                bucket = "screenshots"
                region = "auto"
                "#,
            )?;
            let config = Config::load(Some(Path::new("config.toml"))).unwrap();
            assert_eq!(config.enabled(), &[DestinationId::from("local"), DestinationId::from("r2")]);
            assert_eq!(config.background(), &[DestinationId::from("weibo")]);
            assert_eq!(config.flush_interval(), Duration::from_millis(50));

            let settings = config.settings();
            assert_eq!(settings.get("local"), Some(&json!({"directory": "/srv/mirror"})));
            assert_eq!(settings.get("r2"), Some(&json!({"bucket": "screenshots", "region": "auto"})));
            assert_eq!(settings.get("weibo"), None);
            Ok(())
        });
    }

    #[rstest]
    #[case("config.yaml", "background: [weibo]\nflush_interval_ms: 20\n")]
    #[case("config.yml", "background: [weibo]\nflush_interval_ms: 20\n")]
    #[case("config.json", r#"{"background": ["weibo"], "flush_interval_ms": 20}"#)]
    fn test_load_by_extension(#[case] name: &str, #[case] contents: &str) {
        jailed(|jail| {
            jail.create_file(name, contents)?;
            let config = Config::load(Some(Path::new(name))).unwrap();
            assert_eq!(config.background(), &[DestinationId::from("weibo")]);
            assert_eq!(config.flush_interval_ms, 20);
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_extension() {
        jailed(|jail| {
            jail.create_file("config.ini", "enabled = local")?;
            let err = Config::load(Some(Path::new("config.ini"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_path_must_exist() {
        jailed(|_| {
            let err = Config::load(Some(Path::new("nope.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::NotFound(_)));
            Ok(())
        });
    }

    #[test]
    fn test_malformed_file() {
        jailed(|jail| {
            jail.create_file("config.toml", "flush_interval_ms = \"soon\"")?;
            let err = Config::load(Some(Path::new("config.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }

    #[rstest]
    #[case("flush_interval_ms = 5")]
    #[case("background = [\"  \"]")]
    #[case("enabled = [\"\"]")]
    fn test_invalid(#[case] contents: &str) {
        jailed(|jail| {
            jail.create_file("config.toml", contents)?;
            let err = Config::load(Some(Path::new("config.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_same_id_enabled_and_background() {
        jailed(|jail| {
            jail.create_file("config.toml", "enabled = [\"weibo\"]\nbackground = [\"weibo\"]")?;
            assert!(Config::load(Some(Path::new("config.toml"))).is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        jailed(|jail| {
            jail.create_file("config.toml", "flush_interval_ms = 50\n[destinations.r2]\nbucket = \"from-file\"")?;
            jail.set_env("FANOUT_FLUSH_INTERVAL_MS", "250");
            jail.set_env("FANOUT_DESTINATIONS__R2__BUCKET", "from-env");
            let config = Config::load(Some(Path::new("config.toml"))).unwrap();
            assert_eq!(config.flush_interval_ms, 250);
            assert_eq!(config.settings().get("r2"), Some(&json!({"bucket": "from-env"})));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_environment_value() {
        jailed(|jail| {
            jail.create_file("config.toml", "flush_interval_ms = 50")?;
            jail.set_env("FANOUT_FLUSH_INTERVAL_MS", "3");
            let err = Config::load(Some(Path::new("config.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }
}
