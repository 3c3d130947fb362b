//! Configuration for changeflow.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags and their environment variables (see `cli`)
//! 2. Config file (.changeflow/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .changeflow/config.yaml
//!
//! The home directory (CHANGEFLOW_HOME, default ~/.changeflow) holds the
//! log file written while the live display owns the terminal.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_TERRAFORM_BINARY: &str = "terraform";
const LOG_FILE_NAME: &str = "changeflow.log";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub terraform: TerraformConfig,
    #[serde(default)]
    pub change: ChangeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub url: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TerraformConfig {
    pub binary: Option<String>,
    pub aws_profile: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeConfig {
    pub ticket_link: Option<String>,
}

/// Configuration after merging the file with defaults
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to changeflow home
    pub home: PathBuf,
    pub api_url: String,
    pub api_key: Option<String>,
    pub terraform_binary: String,
    pub aws_profile: Option<String>,
    pub ticket_link: Option<String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    fn resolve(home: PathBuf, file: Option<(PathBuf, ConfigFile)>) -> Self {
        let (config_file, config) = match file {
            Some((path, config)) => (Some(path), Some(config)),
            None => (None, None),
        };
        let api = config.as_ref().map(|c| c.api.clone()).unwrap_or_default();
        let terraform = config
            .as_ref()
            .map(|c| c.terraform.clone())
            .unwrap_or_default();
        let change = config.map(|c| c.change).unwrap_or_default();

        Self {
            home,
            api_url: api.url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: api.key,
            terraform_binary: terraform
                .binary
                .unwrap_or_else(|| DEFAULT_TERRAFORM_BINARY.to_string()),
            aws_profile: terraform.aws_profile,
            ticket_link: change.ticket_link,
            config_file,
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.home.join(LOG_FILE_NAME)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".changeflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let home = match std::env::var("CHANGEFLOW_HOME") {
        Ok(home) => PathBuf::from(home),
        Err(_) => dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".changeflow"),
    };

    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    Ok(ResolvedConfig::resolve(home, file))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(body: &str) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".changeflow");
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", body).unwrap();
        (temp, path)
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ResolvedConfig::resolve(PathBuf::from("/tmp/cf-home"), None);

        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.terraform_binary, "terraform");
        assert!(config.api_key.is_none());
        assert!(config.ticket_link.is_none());
        assert!(config.config_file.is_none());
        assert_eq!(config.log_file(), PathBuf::from("/tmp/cf-home/changeflow.log"));
    }

    #[test]
    fn test_config_file_parsing() {
        let (_temp, path) = write_config(
            r#"
version: "1.0"
api:
  url: https://changes.example.com
terraform:
  binary: tofu
  aws_profile: staging
change:
  ticket_link: https://tickets.example.com/CHG-42
"#,
        );

        let file = load_config_file(&path).unwrap();
        assert_eq!(file.version, "1.0");

        let config = ResolvedConfig::resolve(PathBuf::from("/h"), Some((path.clone(), file)));
        assert_eq!(config.api_url, "https://changes.example.com");
        assert_eq!(config.terraform_binary, "tofu");
        assert_eq!(config.aws_profile.as_deref(), Some("staging"));
        assert_eq!(
            config.ticket_link.as_deref(),
            Some("https://tickets.example.com/CHG-42")
        );
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_sections_are_optional() {
        let (_temp, path) = write_config("version: \"1.0\"");
        let file = load_config_file(&path).unwrap();
        let config = ResolvedConfig::resolve(PathBuf::from("/h"), Some((path, file)));
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let (_temp, path) = write_config("version: [unclosed");
        let err = load_config_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
