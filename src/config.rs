//! Configuration types, built once from environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Mailbox access protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Imap,
    Pop3,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imap" => Ok(Self::Imap),
            "pop3" => Ok(Self::Pop3),
            other => Err(ConfigError::UnknownProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap => write!(f, "IMAP"),
            Self::Pop3 => write!(f, "POP3"),
        }
    }
}

/// What to do with the rest of a fetch batch when one message fails to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// Log the failure and continue with the next message.
    #[default]
    Skip,
    /// Log the failure and stop processing the current batch.
    Abort,
}

impl FromStr for DecodeFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(ConfigError::InvalidValue {
                key: "DECODE_FAILURE_POLICY".into(),
                message: format!("expected `skip` or `abort`, got `{other}`"),
            }),
        }
    }
}

/// Mailbox connection settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub pop_host: String,
    pub pop_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Raw protocol selector; parsed on every poll so a bad value only
    /// turns cycles into no-ops.
    pub protocol: String,
    /// Decode RFC 2047 encoded-words in `From` as well as `Subject`.
    pub decode_sender: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub name: String,
}

/// Where the `emails` table lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// Local libSQL file.
    Local(PathBuf),
    /// Remote libSQL server reached over HTTP.
    Remote { url: String },
}

impl DatabaseConfig {
    /// Resolve the configured host/name pair into a concrete target.
    pub fn target(&self) -> DatabaseTarget {
        match self.host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => DatabaseTarget::Remote {
                url: format!("http://{host}:{}", self.port),
            },
            _ => {
                let mut path = PathBuf::from(&self.name);
                if path.extension().is_none() {
                    path.set_extension("db");
                }
                DatabaseTarget::Local(path)
            }
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub mail: MailConfig,
    pub database: DatabaseConfig,
    pub poll_interval: Duration,
    pub decode_failure_policy: DecodeFailurePolicy,
    pub log_dir: Option<PathBuf>,
}

impl IngestConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let mail = MailConfig {
            imap_host: var("IMAP_HOST", "imap.mailserver.com"),
            imap_port: parse_var(&lookup, "IMAP_PORT", 993)?,
            pop_host: var("POP_HOST", "pop.mailserver.com"),
            pop_port: parse_var(&lookup, "POP_PORT", 995)?,
            username: var("MAIL_USERNAME", "your-email@mail.com"),
            password: SecretString::from(var("MAIL_PASSWORD", "")),
            protocol: var("MAIL_PROTOCOL", "imap"),
            decode_sender: parse_var(&lookup, "MAIL_DECODE_SENDER", false)?,
            connect_timeout: Duration::from_secs(parse_var(
                &lookup,
                "MAIL_CONNECT_TIMEOUT_SECS",
                30,
            )?),
            read_timeout: Duration::from_secs(parse_var(&lookup, "MAIL_READ_TIMEOUT_SECS", 60)?),
        };

        let database = DatabaseConfig {
            host: lookup("DB_HOST").filter(|h| !h.trim().is_empty()),
            port: parse_var(&lookup, "DB_PORT", 8080)?,
            user: var("DB_USER", "user"),
            password: SecretString::from(var("DB_PASSWORD", "")),
            name: var("DB_NAME", "email_db"),
        };

        let decode_failure_policy = match lookup("DECODE_FAILURE_POLICY") {
            Some(raw) => raw.parse()?,
            None => DecodeFailurePolicy::default(),
        };

        Ok(Self {
            mail,
            database,
            poll_interval: Duration::from_secs(parse_var(&lookup, "POLL_INTERVAL_SECS", 300)?),
            decode_failure_policy,
            log_dir: lookup("LOG_DIR")
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<IngestConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.mail.imap_host, "imap.mailserver.com");
        assert_eq!(config.mail.imap_port, 993);
        assert_eq!(config.mail.pop_port, 995);
        assert_eq!(config.mail.protocol, "imap");
        assert!(!config.mail.decode_sender);
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.decode_failure_policy, DecodeFailurePolicy::Skip);
        assert_eq!(
            config.database.target(),
            DatabaseTarget::Local(PathBuf::from("email_db.db"))
        );
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("MAIL_PROTOCOL", "POP3"),
            ("MAIL_PASSWORD", "hunter2"),
            ("POLL_INTERVAL_SECS", "10"),
            ("DECODE_FAILURE_POLICY", "abort"),
            ("MAIL_DECODE_SENDER", "true"),
        ])
        .unwrap();
        assert_eq!(config.mail.protocol, "POP3");
        assert_eq!(config.mail.password.expose_secret(), "hunter2");
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.decode_failure_policy, DecodeFailurePolicy::Abort);
        assert!(config.mail.decode_sender);
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = config_from(&[("DB_PORT", "five")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DB_PORT"));
    }

    #[test]
    fn remote_target_when_host_set() {
        let config = config_from(&[("DB_HOST", "db.internal"), ("DB_PORT", "9000")]).unwrap();
        assert_eq!(
            config.database.target(),
            DatabaseTarget::Remote {
                url: "http://db.internal:9000".into()
            }
        );
    }

    #[test]
    fn blank_host_means_local() {
        let config = config_from(&[("DB_HOST", "  "), ("DB_NAME", "data/mail.sqlite")]).unwrap();
        assert_eq!(
            config.database.target(),
            DatabaseTarget::Local(PathBuf::from("data/mail.sqlite"))
        );
    }

    #[test]
    fn protocol_parse_is_case_insensitive() {
        assert_eq!("IMAP".parse::<Protocol>().unwrap(), Protocol::Imap);
        assert_eq!("Pop3".parse::<Protocol>().unwrap(), Protocol::Pop3);
        assert!(matches!(
            "smtp".parse::<Protocol>(),
            Err(ConfigError::UnknownProtocol(p)) if p == "smtp"
        ));
    }

    #[test]
    fn debug_output_redacts_passwords() {
        let config = config_from(&[("MAIL_PASSWORD", "topsecret"), ("DB_PASSWORD", "dbsecret")])
            .unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(!rendered.contains("dbsecret"));
    }
}
