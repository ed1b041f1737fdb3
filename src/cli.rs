//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::{Database, UserRole};
use crate::jwt::{ACCESS_TOKEN_DURATION_SECS, REFRESH_TOKEN_DURATION_SECS};
use crate::password::DEFAULT_BCRYPT_COST;
use crate::rate_limit::{DEFAULT_AUTH_RATE_PER_MINUTE, RateLimitConfig};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MIN_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "cinevault", about = "Account and session backend for a movie-streaming site")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Path to SQLite database file (":memory:" for a throwaway database)
    #[arg(short, long, env = "DATABASE_URL", default_value = "cinevault.db")]
    pub database: String,

    /// Path to file containing the access token secret. Prefer ACCESS_TOKEN_SECRET
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer REFRESH_TOKEN_SECRET
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = ACCESS_TOKEN_DURATION_SECS)]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, default_value_t = REFRESH_TOKEN_DURATION_SECS)]
    pub refresh_token_ttl: u64,

    /// bcrypt cost factor for password hashes
    #[arg(long, default_value_t = DEFAULT_BCRYPT_COST, value_parser = clap::value_parser!(u32).range(4..=31))]
    pub bcrypt_cost: u32,

    /// Register/login/social-auth attempts allowed per client IP and minute
    #[arg(long, default_value_t = DEFAULT_AUTH_RATE_PER_MINUTE)]
    pub auth_rate_per_minute: u32,

    /// Trust X-Forwarded-For for client IPs (only behind a reverse proxy)
    #[arg(long)]
    pub trust_proxy: bool,

    /// Promote the account with this email to admin on startup
    #[arg(long, value_name = "EMAIL")]
    pub grant_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Errors while assembling the startup configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is required. Set the {name} environment variable (recommended) or use {flag}")]
    MissingSecret { name: &'static str, flag: &'static str },
    #[error("Failed to read {path}: {source}")]
    SecretFile {
        path: String,
        source: std::io::Error,
    },
    #[error("{name} is shorter than 32 characters. Use a longer secret")]
    ShortSecret { name: &'static str },
    #[error("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ")]
    SharedSecret,
}

/// Initialize logging based on the specified format. Filtering follows `RUST_LOG`.
pub fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Load one secret from its environment variable or a file.
/// The variable is removed from the environment once read.
fn load_secret(
    name: &'static str,
    flag: &'static str,
    file: Option<&str>,
) -> Result<String, ConfigError> {
    let secret = if let Ok(secret) = std::env::var(name) {
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(name) };
        secret
    } else if let Some(path) = file {
        std::fs::read_to_string(path)
            .map_err(|source| ConfigError::SecretFile {
                path: path.to_string(),
                source,
            })?
            .trim()
            .to_string()
    } else {
        return Err(ConfigError::MissingSecret { name, flag });
    };

    if secret.len() < MIN_SECRET_LENGTH {
        return Err(ConfigError::ShortSecret { name });
    }

    Ok(secret)
}

/// Load both token secrets. They must be distinct.
pub fn load_token_secrets(
    access_secret_file: Option<&str>,
    refresh_secret_file: Option<&str>,
) -> Result<(String, String), ConfigError> {
    let access = load_secret(
        "ACCESS_TOKEN_SECRET",
        "--access-secret-file",
        access_secret_file,
    )?;
    let refresh = load_secret(
        "REFRESH_TOKEN_SECRET",
        "--refresh-secret-file",
        refresh_secret_file,
    )?;

    if access == refresh {
        return Err(ConfigError::SharedSecret);
    }

    Ok((access, refresh))
}

/// Handle the --grant-admin flag: promote an existing account to admin.
pub async fn handle_grant_admin(db: &Database, email: &str) {
    match db.users().get_by_email(email).await {
        Ok(Some(user)) if user.role == UserRole::Admin => {
            info!(user_id = %user.uuid, "User is already an admin");
        }
        Ok(Some(user)) => match db.users().set_role(user.id, UserRole::Admin).await {
            Ok(_) => info!(user_id = %user.uuid, "Granted admin role"),
            Err(e) => {
                error!(error = %e, "Failed to grant admin role");
                std::process::exit(1);
            }
        },
        Ok(None) => {
            warn!(email = %email, "No user with this email; register first, then rerun with --grant-admin");
        }
        Err(e) => {
            error!(error = %e, "Failed to look up user");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, secrets: (String, String)) -> ServerConfig {
    let (access_secret, refresh_secret) = secrets;
    ServerConfig {
        db,
        access_secret: access_secret.into_bytes(),
        refresh_secret: refresh_secret.into_bytes(),
        access_ttl: args.access_token_ttl,
        refresh_ttl: args.refresh_token_ttl,
        bcrypt_cost: args.bcrypt_cost,
        rate_limit: Arc::new(RateLimitConfig::new(
            args.auth_rate_per_minute,
            args.trust_proxy,
        )),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["cinevault"]).unwrap();

        assert_eq!(args.access_token_ttl, 300);
        assert_eq!(args.refresh_token_ttl, 86400);
        assert_eq!(args.bcrypt_cost, 10);
        assert!(!args.trust_proxy);
        assert!(args.grant_admin.is_none());
    }

    #[test]
    fn test_bcrypt_cost_range() {
        assert!(Args::try_parse_from(["cinevault", "--bcrypt-cost", "3"]).is_err());
        assert!(Args::try_parse_from(["cinevault", "--bcrypt-cost", "12"]).is_ok());
    }

    #[test]
    fn test_secret_file_is_trimmed_and_checked() {
        let dir = std::env::temp_dir();
        let short = dir.join("cinevault-short-secret");
        let long = dir.join("cinevault-long-secret");
        std::fs::write(&short, "short\n").unwrap();
        std::fs::write(&long, format!("{}\n", "x".repeat(40))).unwrap();

        assert!(matches!(
            load_secret("CINEVAULT_TEST_UNSET_SECRET", "--flag", short.to_str()),
            Err(ConfigError::ShortSecret { .. })
        ));
        assert_eq!(
            load_secret("CINEVAULT_TEST_UNSET_SECRET", "--flag", long.to_str()).unwrap(),
            "x".repeat(40)
        );
        assert!(matches!(
            load_secret("CINEVAULT_TEST_UNSET_SECRET", "--flag", None),
            Err(ConfigError::MissingSecret { .. })
        ));
    }
}
