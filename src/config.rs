use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::catalog::spotify::ClientOptions;
use crate::matcher::WideningPolicy;
use crate::update::RefreshOptions;

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub matching: MatchingConfig,
    pub cache: CacheConfig,
}

/// Spotify API credentials and HTTP behaviour.
/// Credentials left unset are prompted for.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after a throttling (429) response.
    pub max_retries: u32,
    /// Minimum delay between requests in milliseconds.
    pub rate_limit_ms: u64,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            timeout_secs: 10,
            max_retries: 3,
            rate_limit_ms: 100,
        }
    }
}

/// Matching search settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub min_count: usize,
    pub max_tracks: usize,
    pub page_size: usize,
    pub top_genres: usize,
    pub initial_radius: f64,
    pub radius_step: f64,
    pub max_radius: f64,
    pub max_rounds: usize,
    /// Proceed with fewer than `min_count` matches instead of failing.
    pub allow_partial: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        let options = RefreshOptions::default();
        Self {
            min_count: options.min_count,
            max_tracks: options.max_tracks,
            page_size: options.page_size,
            top_genres: options.top_genres,
            initial_radius: options.policy.initial_radius,
            radius_step: options.policy.radius_step,
            max_radius: options.policy.max_radius,
            max_rounds: options.policy.max_rounds,
            allow_partial: options.allow_partial,
        }
    }
}

/// Lookup cache settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Days before a cached lookup is fetched again.
    pub ttl_days: i64,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_days: 30,
            db_path: None,
        }
    }
}

impl AppConfig {
    /// Load config from `path`, or `~/.config/playmatch/config.toml` when
    /// none is given. Returns default config if the file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load(path: Option<&Path>) -> Self {
        let config_path = path.map(Path::to_path_buf).or_else(Self::config_path);
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: Duration::from_secs(self.spotify.timeout_secs.max(1)),
            max_retries: self.spotify.max_retries,
            rate_limit_ms: self.spotify.rate_limit_ms,
        }
    }

    pub fn refresh_options(&self) -> RefreshOptions {
        let m = &self.matching;
        RefreshOptions {
            top_genres: m.top_genres,
            min_count: m.min_count,
            max_tracks: m.max_tracks,
            page_size: m.page_size.max(1),
            policy: WideningPolicy {
                initial_radius: m.initial_radius,
                radius_step: m.radius_step,
                max_radius: m.max_radius,
                max_rounds: m.max_rounds,
            },
            allow_partial: m.allow_partial,
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default cache database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("cache.db")
    } else {
        PathBuf::from("playmatch-cache.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.matching.min_count, 20);
        assert_eq!(config.matching.top_genres, 5);
        assert_eq!(config.spotify.timeout_secs, 10);
        assert!(config.cache.enabled);
        assert_eq!(config.refresh_options(), RefreshOptions::default());
    }

    #[test]
    fn test_partial_sections_override() {
        let config = AppConfig::parse(
            r#"
            [spotify]
            client_id = "abc"
            redirect_uri = "http://127.0.0.1:8888/callback"

            [matching]
            min_count = 30
            max_rounds = 4
            allow_partial = true

            [cache]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.spotify.client_id.as_deref(), Some("abc"));
        assert!(config.spotify.client_secret.is_none());
        assert_eq!(config.spotify.max_retries, 3);

        let options = config.refresh_options();
        assert_eq!(options.min_count, 30);
        assert_eq!(options.max_tracks, 50);
        assert_eq!(options.policy.max_rounds, 4);
        assert!((options.policy.initial_radius - 0.1).abs() < 1e-12);
        assert!(options.allow_partial);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_days, 30);
    }

    #[test]
    fn test_client_options() {
        let config = AppConfig::parse("[spotify]\ntimeout_secs = 0\nrate_limit_ms = 250").unwrap();
        let options = config.client_options();
        assert_eq!(options.timeout, Duration::from_secs(1));
        assert_eq!(options.rate_limit_ms, 250);
    }

    #[test]
    fn test_bad_types_are_errors() {
        assert!(AppConfig::parse("[matching]\nmin_count = \"lots\"").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/playmatch/config.toml")));
        assert_eq!(config.matching.max_tracks, 50);
    }
}
