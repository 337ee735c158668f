use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Backoffice Session - admin client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the back-office API
    #[arg(short = 'u', long, env = "BACKOFFICE_API_URL")]
    pub api_url: Option<String>,

    /// Path to the session store database
    #[arg(short = 's', long, env = "SESSION_STORE_FILE")]
    pub store_file: Option<String>,

    /// Assumed token validity window in seconds
    #[arg(long, env = "SESSION_TTL_SECS", default_value = "604800")]
    pub session_ttl: u64,

    /// Seconds before assumed expiry at which renewal fires
    #[arg(long, env = "TOKEN_REFRESH_THRESHOLD", default_value = "300")]
    pub refresh_threshold: u64,

    /// Bootstrap grace window in milliseconds
    #[arg(long, env = "BOOTSTRAP_GRACE_MS", default_value = "1500")]
    pub bootstrap_grace_ms: u64,

    /// Response cache TTL in seconds
    #[arg(long, env = "RESPONSE_CACHE_TTL", default_value = "60")]
    pub cache_ttl: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in and persist the session
    Login {
        /// Account identifier; prompted for when omitted
        identifier: Option<String>,
    },

    /// Validate the stored session and show its state
    Status {
        /// Path to evaluate the route guard against
        #[arg(long, default_value = crate::guard::DEFAULT_AUTHENTICATED_PATH)]
        path: String,
    },

    /// Follow session state changes until interrupted
    Watch,

    /// End the session and clear persisted credentials
    Logout {
        /// Path the user is leaving from
        #[arg(long, default_value = crate::guard::DEFAULT_AUTHENTICATED_PATH)]
        path: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Back-office API base URL
    pub api_url: String,

    /// Session store location
    pub store_file: PathBuf,

    /// Assumed token validity window (seconds). The backend never returns
    /// an explicit expiry, so renewal timing is computed from this.
    pub session_ttl: u64,

    /// Safety threshold before assumed expiry (seconds)
    pub refresh_threshold: u64,

    /// Bootstrap grace window (milliseconds)
    pub bootstrap_grace_ms: u64,

    /// Response cache TTL (seconds)
    pub cache_ttl: u64,

    // HTTP client
    pub connect_timeout: u64,
    pub request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args)?;
        Ok((config, args.command))
    }

    fn from_args(args: &CliArgs) -> Result<Self> {
        let config = Config {
            api_url: args
                .api_url
                .clone()
                .context("BACKOFFICE_API_URL is required (use -u or set BACKOFFICE_API_URL)")?,

            store_file: args
                .store_file
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_store_file),

            session_ttl: args.session_ttl,
            refresh_threshold: args.refresh_threshold,
            bootstrap_grace_ms: args.bootstrap_grace_ms,
            cache_ttl: args.cache_ttl,
            connect_timeout: args.connect_timeout,
            request_timeout: args.request_timeout,
            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.api_url)
            .with_context(|| format!("BACKOFFICE_API_URL is not a valid URL: {}", self.api_url))?;

        if self.refresh_threshold >= self.session_ttl {
            anyhow::bail!(
                "TOKEN_REFRESH_THRESHOLD ({}) must be smaller than SESSION_TTL_SECS ({})",
                self.refresh_threshold,
                self.session_ttl
            );
        }

        Ok(())
    }
}

/// Default session store location under the user data directory
fn default_store_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("backoffice-session")
        .join("session.sqlite3")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            api_url: "https://api.example.com".to_string(),
            store_file: PathBuf::from("/tmp/session.sqlite3"),
            session_ttl: 604800,
            refresh_threshold: 300,
            bootstrap_grace_ms: 1500,
            cache_ttl: 60,
            connect_timeout: 10,
            request_timeout: 30,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_relative_path() {
        let path = expand_tilde("relative/path");
        assert_eq!(path, PathBuf::from("relative/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = base_config();
        config.api_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_threshold_beyond_ttl() {
        let mut config = base_config();
        config.session_ttl = 200;
        config.refresh_threshold = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_store_file_has_stable_name() {
        let path = default_store_file();
        assert!(path.ends_with("backoffice-session/session.sqlite3"));
    }
}
