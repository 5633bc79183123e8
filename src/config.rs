use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::guardian::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::query::{CategorySet, FeedQuery, OrderBy, GUARDIAN_SEARCH_URL};

const DEFAULT_ENV_PREFIX: &str = "STEM_NEWS";
pub const DEFAULT_CATEGORIES: [&str; 4] = ["science", "technology", "engineering", "mathematics"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub guardian: GuardianConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardianConfig {
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            base_url: default_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_api_key() -> String {
    "test".into()
}

fn default_base_url() -> String {
    GUARDIAN_SEARCH_URL.into()
}

fn default_user_agent() -> String {
    format!("stem-news/{}", crate::VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default = "default_categories")]
    pub categories: CategorySet,
    #[serde(default = "default_restore_session")]
    pub restore_session: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            order_by: OrderBy::default(),
            categories: default_categories(),
            restore_session: default_restore_session(),
        }
    }
}

pub fn default_categories() -> CategorySet {
    DEFAULT_CATEGORIES.into_iter().collect()
}

fn default_restore_session() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
        }
    }
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_read_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

impl Config {
    pub fn feed_query(&self) -> FeedQuery {
        FeedQuery {
            base_url: self.guardian.base_url.clone(),
            api_key: self.guardian.api_key.clone(),
            order_by: self.feed.order_by,
            categories: self.feed.categories.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    if cfg.feed.categories.is_empty() {
        warn!("config: no categories selected; using defaults");
        cfg.feed.categories = default_categories();
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.guardian.api_key.is_empty() {
        base.guardian.api_key = other.guardian.api_key;
    }
    if !other.guardian.base_url.is_empty() {
        base.guardian.base_url = other.guardian.base_url;
    }
    if !other.guardian.user_agent.is_empty() {
        base.guardian.user_agent = other.guardian.user_agent;
    }

    base.feed.order_by = other.feed.order_by;
    if !other.feed.categories.is_empty() {
        base.feed.categories = other.feed.categories;
    }
    base.feed.restore_session = other.feed.restore_session;

    if !other.http.connect_timeout.is_zero() {
        base.http.connect_timeout = other.http.connect_timeout;
    }
    if !other.http.read_timeout.is_zero() {
        base.http.read_timeout = other.http.read_timeout;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "guardian.api_key" => cfg.guardian.api_key = value,
        "guardian.base_url" => cfg.guardian.base_url = value,
        "guardian.user_agent" => cfg.guardian.user_agent = value,
        "feed.order_by" => match OrderBy::from_key(&value) {
            Some(order) => cfg.feed.order_by = order,
            None => warn!("config: ignoring unknown order {value:?}"),
        },
        "feed.categories" => {
            let categories: CategorySet = value.split(',').collect();
            if !categories.is_empty() {
                cfg.feed.categories = categories;
            }
        }
        "feed.restore_session" => {
            cfg.feed.restore_session = matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        "http.connect_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.http.connect_timeout = duration;
            }
        }
        "http.read_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.http.read_timeout = duration;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stem-news").join("config.yaml"))
}

/// Writes the sort order and category selection back to the config file, keeping
/// every other setting already in it.
pub fn save_feed_settings(
    path: Option<PathBuf>,
    order_by: OrderBy,
    categories: &CategorySet,
) -> Result<PathBuf> {
    anyhow::ensure!(
        !categories.is_empty(),
        "config: at least one category is required"
    );

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };

    cfg.feed.order_by = order_by;
    cfg.feed.categories = categories.clone();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn isolated() -> LoadOptions {
        let dir = tempdir().unwrap();
        LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("STEM_NEWS_TEST_UNUSED".into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(isolated()).unwrap();
        assert_eq!(cfg.guardian.api_key, "test");
        assert_eq!(cfg.feed.order_by, OrderBy::Newest);
        assert_eq!(cfg.feed.categories.len(), 4);
        assert_eq!(cfg.http.connect_timeout, Duration::from_millis(15_000));
        assert_eq!(cfg.http.read_timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "guardian:\n  api_key: secret\nfeed:\n  order_by: relevance\n  categories: [physics, Physics, space]\nhttp:\n  read_timeout: 3s\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("STEM_NEWS_TEST_UNUSED".into()),
        })
        .unwrap();
        assert_eq!(cfg.guardian.api_key, "secret");
        assert_eq!(cfg.feed.order_by, OrderBy::Relevance);
        assert_eq!(cfg.feed.categories.iter().collect::<Vec<_>>(), ["physics", "space"]);
        assert_eq!(cfg.http.read_timeout, Duration::from_secs(3));
        assert_eq!(cfg.http.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn save_feed_settings_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let categories: CategorySet = ["science", "mathematics"].into_iter().collect();
        save_feed_settings(Some(path.clone()), OrderBy::Relevance, &categories).unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.feed.order_by, OrderBy::Relevance);
        assert_eq!(saved.feed.categories, categories);
        assert_eq!(saved.guardian.api_key, "test");
    }

    #[test]
    fn save_rejects_empty_categories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        assert!(save_feed_settings(Some(path), OrderBy::Newest, &CategorySet::new()).is_err());
    }

    #[test]
    fn env_overrides() {
        env::set_var("STEM_NEWS_ENVTEST_FEED__ORDER_BY", "relevance");
        env::set_var("STEM_NEWS_ENVTEST_FEED__CATEGORIES", "space, physics");
        let mut options = isolated();
        options.env_prefix = Some("STEM_NEWS_ENVTEST".into());
        let cfg = load(options).unwrap();
        assert_eq!(cfg.feed.order_by, OrderBy::Relevance);
        assert_eq!(cfg.feed.categories.disjunction(), "space OR physics");
        env::remove_var("STEM_NEWS_ENVTEST_FEED__ORDER_BY");
        env::remove_var("STEM_NEWS_ENVTEST_FEED__CATEGORIES");
    }
}
