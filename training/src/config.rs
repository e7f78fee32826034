//! YAML configuration loading for the `authorid` binary.
//!
//! Loads [`AuthorIdConfig`] from a YAML file on disk, falling back to
//! defaults when no file is specified.

use authorid_core::AuthorIdConfig;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "AUTHORID_CONFIG";

/// Load an [`AuthorIdConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn load_config(path: &Path) -> anyhow::Result<AuthorIdConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: AuthorIdConfig = serde_yaml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {}", e))?;
    Ok(config)
}

/// Pick the config file: the explicit flag, then `AUTHORID_CONFIG`.
pub fn config_path(flag: Option<PathBuf>, env: Option<String>) -> Option<PathBuf> {
    flag.or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
}

/// Load the configuration named by `flag` or the environment, or defaults.
pub fn resolve_config(flag: Option<PathBuf>) -> anyhow::Result<AuthorIdConfig> {
    match config_path(flag, std::env::var(CONFIG_ENV).ok()) {
        Some(path) => load_config(&path),
        None => Ok(AuthorIdConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper to write YAML to a temp file and return the path.
    fn write_yaml(yaml: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_load_config_full() {
        let yaml = r#"
corpus:
  path: "exports/chat.jsonl"
storage:
  artifacts_dir: "/var/lib/authorid"
  progress_path: "/var/log/authorid/progress.jsonl"
training:
  amount: 3
  quotient: 0.75
  seed: 7
  learning_rate: 0.0005
  batch_size: 32
  max_epochs: 40
  kfold_max_epochs: 20
  patience: 5
model:
  dropout: 0.2
  metrics_width: 64
  token_width: 32
  block_widths: [128, 64]
  token_blocks: 2
  fusion_width: 16
logging:
  level: debug
  format: json
"#;
        let f = write_yaml(yaml);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.corpus.path, "exports/chat.jsonl");
        assert_eq!(
            config.storage.progress_path.as_deref(),
            Some("/var/log/authorid/progress.jsonl")
        );
        assert_eq!(config.training.amount, 3);
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.model.block_widths, (128, 64));
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_empty_mapping_is_default() {
        let f = write_yaml("{}\n");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config, AuthorIdConfig::default());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Path::new("/nonexistent/authorid.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let f = write_yaml("not: [valid: yaml: {{{}}}");
        let result = load_config(f.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_config_path_precedence() {
        let flag = Some(PathBuf::from("flag.yaml"));
        let env = Some("env.yaml".to_string());
        assert_eq!(config_path(flag.clone(), env.clone()), flag);
        assert_eq!(config_path(None, env), Some(PathBuf::from("env.yaml")));
        assert_eq!(config_path(None, Some(String::new())), None);
        assert_eq!(config_path(None, None), None);
    }
}
