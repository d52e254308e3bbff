//! Configuration file support

use murmur_core::ChatTarget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Threads shown per page when nothing else is configured
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Configuration for murmur
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider of the default model
    pub provider: Option<String>,
    /// Default model
    pub model: Option<String>,
    /// Default agent (takes precedence over a plain model)
    pub agent: Option<String>,
    /// Gateway routing the model (takes precedence over agent and model)
    pub gateway: Option<String>,
    /// Threads per page when listing
    pub page_size: Option<usize>,
    /// Where thread files live
    pub data_dir: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("murmur")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MURMUR_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file, falling back to defaults if it is missing or
    /// cannot be parsed
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to a file, creating its directory
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            provider: Some("anthropic".to_string()),
            model: Some("claude-sonnet-4-5".to_string()),
            page_size: Some(DEFAULT_PAGE_SIZE),
            ..Default::default()
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// Where new messages go: a gateway, then an agent, then a plain model.
    ///
    /// Returns `None` when nothing usable is configured.
    pub fn target(&self) -> Option<ChatTarget> {
        if let (Some(gateway), Some(model)) = (&self.gateway, &self.model) {
            return Some(ChatTarget::Gateway {
                id: gateway.clone(),
                model: model.clone(),
            });
        }
        if let Some(agent) = &self.agent {
            return Some(ChatTarget::Agent { id: agent.clone() });
        }
        self.model.as_ref().map(|model| ChatTarget::Model {
            provider: self
                .provider
                .clone()
                .unwrap_or_else(|| "anthropic".to_string()),
            model: model.clone(),
        })
    }

    /// Threads per page, never zero
    pub fn page_size(&self) -> usize {
        self.page_size.filter(|n| *n > 0).unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Directory holding thread files
    pub fn threads_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => crate::store::JsonlThreadStore::default_dir(),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# murmur configuration file
# Place at ~/.config/murmur/config.toml (Linux/Mac) or %APPDATA%\murmur\config.toml (Windows)

# Default model and its provider
provider = "anthropic"
model = "claude-sonnet-4-5"

# Send to an agent instead of a plain model (optional)
# agent = "researcher"

# Route the model through a gateway (optional, needs `model`)
# gateway = "corp-gateway"

# Threads per page for `murmur --threads`
page_size = 20

# Where thread files are stored (optional)
# data_dir = "~/.local/share/murmur/threads"
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.provider.as_deref(), Some("anthropic"));
        assert_eq!(config.page_size(), 20);
        assert!(config.agent.is_none());
    }

    #[test]
    fn test_target_precedence() {
        let mut config = Config {
            provider: Some("openai".into()),
            model: Some("gpt-4o".into()),
            ..Default::default()
        };
        assert_eq!(
            config.target(),
            Some(ChatTarget::Model {
                provider: "openai".into(),
                model: "gpt-4o".into()
            })
        );

        config.agent = Some("helper".into());
        assert_eq!(
            config.target(),
            Some(ChatTarget::Agent {
                id: "helper".into()
            })
        );

        config.gateway = Some("gw".into());
        assert_eq!(
            config.target(),
            Some(ChatTarget::Gateway {
                id: "gw".into(),
                model: "gpt-4o".into()
            })
        );

        assert_eq!(Config::default().target(), None);
    }

    #[test]
    fn test_zero_page_size_falls_back() {
        let config = Config {
            page_size: Some(0),
            ..Default::default()
        };
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_load_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert_eq!(Config::load_from(&missing), Config::default());

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "page_size = \"lots\"").unwrap();
        assert_eq!(Config::load_from(&broken), Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            agent: Some("helper".into()),
            data_dir: Some("/tmp/threads".into()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.threads_dir(), PathBuf::from("/tmp/threads"));
    }
}
