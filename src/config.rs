//! Startup configuration, read once from the environment.
//!
//! Mirrors the host's convention of failing fast at boot on a bad
//! environment rather than deferring to a panic mid-request.

use crate::errors::*;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::env;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DbType {
    Postgresql,
    Mysql,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub db_host:     String,
    pub db_port:     u16,
    pub db_user:     String,
    pub db_password: String,
    pub db_name:     String,
    pub db_ssl_mode: String,
    pub db_type:     DbType,
    pub environment: Environment,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let db_type = match env_or(
            "DB_TYPE",
            "postgresql",
        )
        .to_lowercase()
        .as_str()
        {
            "postgresql" => DbType::Postgresql,
            "mysql" => DbType::Mysql,
            other => {
                return Err(
                    error::invalid_input(format!("unrecognized DB_TYPE: {}", other)).into(),
                )
            }
        };

        if db_type == DbType::Mysql {
            return Err(error::invalid_input(
                "DB_TYPE=mysql is recognized but unsupported by this core: the schema and \
                 upsert queries target PostgreSQL's ON CONFLICT support"
                    .to_owned(),
            )
            .into());
        }

        let environment = match env_or("ENVIRONMENT", "development").to_lowercase().as_str() {
            "development" => Environment::Development,
            "test" => Environment::Test,
            "production" => Environment::Production,
            other => {
                return Err(
                    error::invalid_input(format!("unrecognized ENVIRONMENT: {}", other)).into(),
                )
            }
        };

        Ok(Config {
            server_port: env_or("SERVER_PORT", "8080")
                .parse()
                .chain_err(|| "SERVER_PORT must be a valid port number")?,
            db_host: env_or("DB_HOST", "localhost"),
            db_port: env_or("DB_PORT", "5432")
                .parse()
                .chain_err(|| "DB_PORT must be a valid port number")?,
            db_user: env_or("DB_USER", "postgres"),
            db_password: env::var("DB_PASSWORD").unwrap_or_default(),
            db_name: env_or("DB_NAME", "pinepods"),
            db_ssl_mode: env_or("DB_SSL_MODE", "prefer"),
            db_type,
            environment,
        })
    }

    /// Builds a libpq/Diesel connection string from the discrete fields.
    /// The host owns the database; we only ever connect to it.
    ///
    /// User/password are percent-encoded so a credential containing `:`,
    /// `@`, or `/` doesn't get parsed as part of the URL's authority.
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            utf8_percent_encode(&self.db_user, NON_ALPHANUMERIC),
            utf8_percent_encode(&self.db_password, NON_ALPHANUMERIC),
            self.db_host,
            self.db_port,
            self.db_name,
            self.db_ssl_mode,
        )
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_mysql() {
        env::set_var("DB_TYPE", "mysql");
        let result = Config::from_env();
        env::remove_var("DB_TYPE");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_environment() {
        env::set_var("ENVIRONMENT", "staging-ish");
        let result = Config::from_env();
        env::remove_var("ENVIRONMENT");
        assert!(result.is_err());
    }
}
