use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
const DEFAULT_LOG_DIR: &str = "logs";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is absent or empty.
    #[error("missing required setting {0}")]
    Missing(&'static str),
    /// A variable is present but unusable.
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    /// The env file exists but could not be read or parsed.
    #[error("failed to read env file '{}': {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Settings for the completion service client.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub endpoint: Url,
    pub model: String,
    /// Deadline for a single attempt, including reading the whole stream.
    pub request_timeout: Duration,
    /// Pause before the one retry after a transport failure.
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub completion: CompletionConfig,
    pub telegram_bot_token: String,
    pub log_dir: PathBuf,
    /// The env file values were read from, if it existed.
    pub env_file: Option<PathBuf>,
}

impl Config {
    /// Load from the process environment, falling back to `env_file`.
    ///
    /// The file is parsed without touching the process environment, and
    /// variables already set in the environment win. A missing file is fine.
    pub fn load<P: AsRef<Path>>(env_file: P) -> Result<Self, ConfigError> {
        let path = env_file.as_ref();
        let file_vars = if path.exists() {
            read_env_file(path)?
        } else {
            HashMap::new()
        };

        let mut config = Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| file_vars.get(key).cloned())
        })?;
        if path.exists() {
            config.env_file = Some(path.to_path_buf());
        }
        Ok(config)
    }

    /// Build and validate a config from a key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));

        let endpoint = parse_endpoint(&require("URL")?)?;
        let model = require("MODEL")?;
        let telegram_bot_token = require("TELEGRAM_BOT_TOKEN")?;
        validate_token(&telegram_bot_token)?;

        let timeout_secs = parse_u64(get("REQUEST_TIMEOUT_SECS"), "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "REQUEST_TIMEOUT_SECS",
                reason: "must be greater than zero".into(),
            });
        }
        let backoff_ms = parse_u64(get("RETRY_BACKOFF_MS"), "RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS)?;

        let log_dir = get("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));

        Ok(Self {
            completion: CompletionConfig {
                endpoint,
                model,
                request_timeout: Duration::from_secs(timeout_secs),
                retry_backoff: Duration::from_millis(backoff_ms),
            },
            telegram_bot_token,
            log_dir,
            env_file: None,
        })
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let to_err = |source: dotenvy::Error| ConfigError::EnvFile { path: path.to_path_buf(), source };
    dotenvy::from_path_iter(path)
        .map_err(to_err)?
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(to_err)
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        var: "URL",
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            var: "URL",
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

// Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
fn validate_token(token: &str) -> Result<(), ConfigError> {
    match token.split_once(':') {
        Some((id, secret)) if id.parse::<u64>().is_ok() && !secret.is_empty() && !secret.contains(':') => Ok(()),
        _ => Err(ConfigError::Invalid {
            var: "TELEGRAM_BOT_TOKEN",
            reason: "expected format 123456789:ABCdefGHI...".into(),
        }),
    }
}

fn parse_u64(value: Option<String>, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("'{v}' is not a non-negative integer"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("URL", "http://localhost:11434/api/generate"),
            ("MODEL", "llama3.1:8b"),
            ("TELEGRAM_BOT_TOKEN", "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"),
        ]
    }

    fn without(key: &str) -> Vec<(&'static str, &'static str)> {
        base().into_iter().filter(|(k, _)| *k != key).collect()
    }

    fn with(key: &'static str, value: &'static str) -> Vec<(&'static str, &'static str)> {
        let mut pairs = without(key);
        pairs.push((key, value));
        pairs
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let config = Config::from_lookup(lookup(&base())).expect("should load valid config");
        assert_eq!(config.completion.endpoint.as_str(), "http://localhost:11434/api/generate");
        assert_eq!(config.completion.model, "llama3.1:8b");
        assert_eq!(config.completion.request_timeout, Duration::from_secs(60));
        assert_eq!(config.completion.retry_backoff, Duration::from_millis(1000));
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert!(config.env_file.is_none());
    }

    #[test]
    fn test_each_required_setting() {
        for var in ["URL", "MODEL", "TELEGRAM_BOT_TOKEN"] {
            let err = assert_err(Config::from_lookup(lookup(&without(var))));
            assert!(matches!(err, ConfigError::Missing(v) if v == var), "{var}: {err}");
            assert!(err.to_string().contains(var));
        }
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let err = assert_err(Config::from_lookup(lookup(&with("MODEL", "   "))));
        assert!(matches!(err, ConfigError::Missing("MODEL")));
    }

    #[test]
    fn test_invalid_url() {
        let err = assert_err(Config::from_lookup(lookup(&with("URL", "not a url"))));
        assert!(matches!(err, ConfigError::Invalid { var: "URL", .. }));

        let err = assert_err(Config::from_lookup(lookup(&with("URL", "ftp://host/api"))));
        assert!(err.to_string().contains("scheme"));
    }

    #[test]
    fn test_invalid_token_formats() {
        for token in ["no_colon", "notanumber:ABC", "123456789:", "1:2:3"] {
            let pairs = with("TELEGRAM_BOT_TOKEN", token);
            let err = assert_err(Config::from_lookup(lookup(&pairs)));
            assert!(
                matches!(err, ConfigError::Invalid { var: "TELEGRAM_BOT_TOKEN", .. }),
                "{token}: {err}"
            );
        }
    }

    #[test]
    fn test_optional_overrides() {
        let mut pairs = base();
        pairs.push(("REQUEST_TIMEOUT_SECS", "15"));
        pairs.push(("RETRY_BACKOFF_MS", "250"));
        pairs.push(("LOG_DIR", "/var/log/spamwarden"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.completion.request_timeout, Duration::from_secs(15));
        assert_eq!(config.completion.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.log_dir, PathBuf::from("/var/log/spamwarden"));
    }

    #[test]
    fn test_bad_numbers() {
        let err = assert_err(Config::from_lookup(lookup(&with("REQUEST_TIMEOUT_SECS", "soon"))));
        assert!(matches!(err, ConfigError::Invalid { var: "REQUEST_TIMEOUT_SECS", .. }));

        let err = assert_err(Config::from_lookup(lookup(&with("REQUEST_TIMEOUT_SECS", "0"))));
        assert!(err.to_string().contains("greater than zero"));

        let err = assert_err(Config::from_lookup(lookup(&with("RETRY_BACKOFF_MS", "-5"))));
        assert!(matches!(err, ConfigError::Invalid { var: "RETRY_BACKOFF_MS", .. }));
    }

    #[test]
    fn test_read_env_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# completion service").unwrap();
        writeln!(file, "SPAMWARDEN_TEST_URL=http://127.0.0.1:11434/api/generate").unwrap();
        writeln!(file, "SPAMWARDEN_TEST_MODEL=\"qwen2.5:7b\"").unwrap();
        let vars = read_env_file(file.path()).expect("should parse env file");
        assert_eq!(vars["SPAMWARDEN_TEST_URL"], "http://127.0.0.1:11434/api/generate");
        assert_eq!(vars["SPAMWARDEN_TEST_MODEL"], "qwen2.5:7b");
    }

    #[test]
    fn test_unparseable_env_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "THIS LINE IS NOT AN ASSIGNMENT").unwrap();
        let err = assert_err(read_env_file(file.path()));
        assert!(matches!(err, ConfigError::EnvFile { .. }));
    }

    #[test]
    fn test_missing_env_file_is_not_an_error_by_itself() {
        // Without the required variables in the environment this still fails,
        // but on a missing setting rather than on the absent file.
        if std::env::var("URL").is_ok() {
            return;
        }
        let err = assert_err(Config::load("/nonexistent/path/.env"));
        assert!(matches!(err, ConfigError::Missing(_)));
    }
}
