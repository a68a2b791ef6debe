//! Environment-driven configuration.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key `{0}`")]
    Missing(&'static str),
    #[error("invalid value for configuration key `{0}`")]
    Invalid(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_db: String,
    pub mongo_table: Option<String>,
    pub mongo_gridfs: bool,
    pub jwt_secret: String,
    pub mail_server: String,
    pub mail_port: u16,
    pub mail_sender: String,
    pub mail_args: Option<Value>,
    pub debug: bool,
    pub debug_notifications: bool,
    pub server_name: Option<String>,
    pub oa_info: Option<Value>,
    pub oa_server_description: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Ok(Config {
            mongo_uri: required("MONGO_URI")?,
            mongo_db: required("MONGO_DB")?,
            mongo_table: optional("MONGO_TABLE"),
            mongo_gridfs: flag("MONGO_GRIDFS"),
            jwt_secret: required("JWT_SECRET")?,
            mail_server: required("MAIL_SERVER")?,
            mail_port: required("MAIL_PORT")?
                .parse()
                .map_err(|_| ConfigError::Invalid("MAIL_PORT"))?,
            mail_sender: required("MAIL_SENDER")?,
            mail_args: json_value("MAIL_ARGS")?,
            debug: flag("DEBUG"),
            debug_notifications: flag("DEBUG_NOTIFICATIONS"),
            server_name: optional("SERVER_NAME"),
            oa_info: json_value("OA_INFO")?,
            oa_server_description: optional("OA_SERVER_DESCRIPTION"),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref(),
        Ok("1") | Ok("true") | Ok("True") | Ok("yes")
    )
}

fn json_value(key: &'static str) -> Result<Option<Value>, ConfigError> {
    match optional(key) {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key)),
        None => Ok(None),
    }
}
