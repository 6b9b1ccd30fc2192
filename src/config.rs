use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use dirs;
use crate::api::pagination::{DEFAULT_PAGE_SIZE, RECOMMENDATIONS_PAGE_SIZE};
use crate::errors::{AppError, Result};

/// Environment variable that points at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "VK_MUSIC_CONFIG";

/// User agent of the Kate Mobile Android client, which the audio API accepts.
pub const KATE_USER_AGENT: &str =
    "KateMobileAndroid/51.1-442 (Android 11; SDK 30; arm64-v8a; Samsung SM-G991B; ru_RU)";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub download_path: PathBuf,
    pub token_file: PathBuf,
    pub api_base_url: String,
    pub api_version: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub proxy: Option<String>,
    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` from the environment when no proxy is configured.
    pub use_system_proxy: bool,
    pub player_path: String,
    pub player_args: Vec<String>,
    pub page_size: usize,
    pub recommendations_page_size: usize,
    pub search_max_results: usize,
    pub max_concurrent_tasks: usize,
    pub playlist_cache_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("VK_Music_Downloads"),
            token_file: PathBuf::from("vk_token.txt"),
            api_base_url: "https://api.vk.com/method".to_string(),
            api_version: "5.131".to_string(),
            user_agent: KATE_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            proxy: None,
            use_system_proxy: true,
            player_path: "mplayer".to_string(),
            player_args: vec![
                "-slave".to_string(),
                "-quiet".to_string(),
                "-identify".to_string(),
            ],
            page_size: DEFAULT_PAGE_SIZE,
            recommendations_page_size: RECOMMENDATIONS_PAGE_SIZE,
            search_max_results: 1000,
            max_concurrent_tasks: 4,
            playlist_cache_ttl_secs: 300,
        }
    }
}

impl AppConfig {
    /// Load the configuration file (creating it with defaults when missing) and
    /// overlay `VK_MUSIC__*` environment variables.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            if let Err(e) = AppConfig::default().save_to(&config_path) {
                log::warn!("Could not write default configuration to {:?}: {}", config_path, e);
            }
        }

        Self::load_from(&config_path)
    }

    /// Layered load from a specific file; a missing file means "defaults only".
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("VK_MUSIC")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("player_args"),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = dirs::config_dir().ok_or_else(|| {
            AppError::Config(config::ConfigError::Message(
                "Could not find config directory".to_string(),
            ))
        })?;

        Ok(config_dir.join("vk-music").join("config.json"))
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(AppError::Config(config::ConfigError::Message(msg.to_string())));

        if self.page_size == 0 || self.recommendations_page_size == 0 {
            return invalid("page sizes must be >= 1");
        }
        if self.max_concurrent_tasks == 0 {
            return invalid("max_concurrent_tasks must be >= 1");
        }
        if self.player_path.trim().is_empty() {
            return invalid("player_path must not be empty");
        }
        Ok(())
    }
}
