//! # Client Configuration
//!
//! Every option the upstream library recognizes, with the same defaults and
//! the same "rejected while connected" mutation discipline. Loadable from
//! process environment (optionally via a `.env` file) so a CLI front-end
//! never needs credentials typed on a command line.

use urfa_common::{ErrorKind, UrfaError};
use urfa_connection::LoginType;

const DEFAULT_LOGIN: &str = "init";
const DEFAULT_PASS: &str = "init";
const DEFAULT_SERVER_PORT: &str = "localhost:11758";
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// All client-configurable options, mirroring the upstream library's
/// recognized `ourfa_conf_*` settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub login: String,
    pub pass: String,
    pub server_port: String,
    pub login_type: LoginTypeConfig,
    pub ssl: bool,
    pub api_xml_file: Option<String>,
    pub timeout_secs: u64,
}

/// A serde-friendly mirror of [`urfa_connection::LoginType`] (the connection
/// crate's enum has no serde dependency of its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LoginTypeConfig {
    User,
    System,
    Card,
}

impl From<LoginTypeConfig> for LoginType {
    fn from(v: LoginTypeConfig) -> LoginType {
        match v {
            LoginTypeConfig::User => LoginType::User,
            LoginTypeConfig::System => LoginType::System,
            LoginTypeConfig::Card => LoginType::Card,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            login: DEFAULT_LOGIN.to_string(),
            pass: DEFAULT_PASS.to_string(),
            server_port: DEFAULT_SERVER_PORT.to_string(),
            login_type: LoginTypeConfig::User,
            ssl: false,
            api_xml_file: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Builds a [`Config`] from process environment variables, reading a
    /// `.env` file first via `dotenvy` if one is present (errors from a
    /// missing `.env` are not fatal — only malformed ones are).
    ///
    /// Recognized variables: `URFA_LOGIN`, `URFA_PASS`, `URFA_SERVER_PORT`,
    /// `URFA_LOGIN_TYPE`, `URFA_SSL`, `URFA_TIMEOUT`, `URFA_API_XML_FILE`.
    pub fn from_env() -> Result<Self, UrfaError> {
        // A missing `.env` is the common case and not an error; dotenvy
        // surfaces that the same way it surfaces a malformed file, so we
        // only log it rather than aborting load.
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(error = %e, "no .env file loaded");
        }

        let mut config = Config::default();
        if let Ok(v) = std::env::var("URFA_LOGIN") {
            config.login = v;
        }
        if let Ok(v) = std::env::var("URFA_PASS") {
            config.pass = v;
        }
        if let Ok(v) = std::env::var("URFA_SERVER_PORT") {
            config.server_port = v;
        }
        if let Ok(v) = std::env::var("URFA_LOGIN_TYPE") {
            config.login_type = parse_login_type(&v)
                .ok_or_else(|| UrfaError::other(format!("invalid URFA_LOGIN_TYPE '{v}'")))?;
        }
        if let Ok(v) = std::env::var("URFA_SSL") {
            config.ssl = parse_bool(&v)
                .ok_or_else(|| UrfaError::other(format!("invalid URFA_SSL '{v}'")))?;
        }
        if let Ok(v) = std::env::var("URFA_TIMEOUT") {
            config.timeout_secs = v
                .parse()
                .map_err(|_| UrfaError::other(format!("invalid URFA_TIMEOUT '{v}'")))?;
        }
        if let Ok(v) = std::env::var("URFA_API_XML_FILE") {
            config.api_xml_file = Some(v);
        }
        Ok(config)
    }

    pub fn set_login(&mut self, login: impl Into<String>, connected: bool) -> Result<(), UrfaError> {
        reject_while_connected(connected)?;
        self.login = login.into();
        Ok(())
    }

    pub fn set_pass(&mut self, pass: impl Into<String>, connected: bool) -> Result<(), UrfaError> {
        reject_while_connected(connected)?;
        self.pass = pass.into();
        Ok(())
    }

    pub fn set_server_port(&mut self, server_port: impl Into<String>, connected: bool) -> Result<(), UrfaError> {
        reject_while_connected(connected)?;
        self.server_port = server_port.into();
        Ok(())
    }

    pub fn set_login_type(&mut self, login_type: &str, connected: bool) -> Result<(), UrfaError> {
        reject_while_connected(connected)?;
        self.login_type = parse_login_type(login_type)
            .ok_or_else(|| UrfaError::other(format!("login_type must be one of user/system/card, got '{login_type}'")))?;
        Ok(())
    }

    pub fn set_ssl(&mut self, ssl: bool, connected: bool) -> Result<(), UrfaError> {
        reject_while_connected(connected)?;
        self.ssl = ssl;
        Ok(())
    }

    pub fn set_timeout_secs(&mut self, timeout_secs: u64, connected: bool) -> Result<(), UrfaError> {
        reject_while_connected(connected)?;
        self.timeout_secs = timeout_secs;
        Ok(())
    }

    pub fn set_api_xml_file(&mut self, path: impl Into<String>, connected: bool) -> Result<(), UrfaError> {
        reject_while_connected(connected)?;
        self.api_xml_file = Some(path.into());
        Ok(())
    }
}

fn reject_while_connected(connected: bool) -> Result<(), UrfaError> {
    if connected {
        Err(UrfaError {
            kind: ErrorKind::Other,
            message: "configuration cannot change while a connection is open".to_string(),
        })
    } else {
        Ok(())
    }
}

fn parse_login_type(s: &str) -> Option<LoginTypeConfig> {
    match s.to_ascii_lowercase().as_str() {
        "user" => Some(LoginTypeConfig::User),
        "system" => Some(LoginTypeConfig::System),
        "card" => Some(LoginTypeConfig::Card),
        _ => None,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upstream() {
        let c = Config::default();
        assert_eq!(c.login, "init");
        assert_eq!(c.pass, "init");
        assert_eq!(c.server_port, "localhost:11758");
        assert_eq!(c.login_type, LoginTypeConfig::User);
        assert!(!c.ssl);
        assert_eq!(c.timeout_secs, 5);
    }

    #[test]
    fn set_login_rejected_while_connected() {
        let mut c = Config::default();
        assert!(c.set_login("bob", true).is_err());
        assert_eq!(c.login, "init");
        assert!(c.set_login("bob", false).is_ok());
        assert_eq!(c.login, "bob");
    }

    #[test]
    fn set_login_type_validates_before_apply() {
        let mut c = Config::default();
        assert!(c.set_login_type("bogus", false).is_err());
        assert_eq!(c.login_type, LoginTypeConfig::User);
        assert!(c.set_login_type("SYSTEM", false).is_ok());
        assert_eq!(c.login_type, LoginTypeConfig::System);
    }
}
