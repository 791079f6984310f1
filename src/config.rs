//! Configuration manager.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AuthError, Result as AuthResult};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Errors raised while loading the configuration file.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot open `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to deserialize `{path}`: {source}")]
    Deserialize {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Authentication backend selection.
    pub auth: Auth,
    /// Related to session token issuance.
    #[serde(default, skip_serializing)]
    pub session: Option<Session>,
    /// Related to logs export.
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
}

fn default_name() -> String {
    "ispyb".into()
}

/// Backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Active Directory or any LDAP v3 server.
    #[serde(alias = "ad", alias = "ldap")]
    Directory,
    /// Users and Argon2 hashes read from a file.
    Local,
    /// Previously issued session tokens.
    Token,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Directory => "directory",
            BackendKind::Local => "local",
            BackendKind::Token => "token",
        }
    }
}

/// Authentication backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    pub plugin: BackendKind,
    #[serde(default, skip_serializing)]
    pub options: Options,
}

/// Session token configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// `iss` claim.
    pub issuer: String,
    /// `aud` claim.
    pub audience: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: Option<u64>,
    pub public_key_pem: String,
    pub private_key_pem: String,
}

/// Telemetry configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// OTLP gRPC endpoint receiving logs.
    pub otlp_endpoint: Option<String>,
}

/// Flat backend options, such as `AD_URI`.
///
/// YAML booleans and numbers are kept as their textual form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Options(BTreeMap<String, String>);

impl Options {
    /// Value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value of `key`, failing when absent or blank.
    pub fn require(&self, key: &str) -> AuthResult<&str> {
        match self.get(key).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(AuthError::MissingSetting(key.to_owned())),
        }
    }

    /// Optional boolean `key`, `default` when absent.
    pub fn flag(&self, key: &str, default: bool) -> AuthResult<bool> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(value) => match value.as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(AuthError::invalid_setting(key, "expected a boolean")),
            },
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'de> Deserialize<'de> for Options {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as _;
        use serde_yaml::Value;

        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        raw.into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    // `KEY:` with nothing after it is an absent setting.
                    Value::Null => return None,
                    Value::String(s) => s,
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => {
                        return Some(Err(D::Error::custom(format!(
                            "option `{key}` must be a scalar"
                        ))));
                    },
                };
                Some(Ok((key, value)))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Options)
    }
}

impl Configuration {
    /// Reads the configuration file at `path`, or `config.yaml`.
    pub fn read(path: Option<&Path>) -> Result<Self, Error> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let file = File::open(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        let config: Configuration = serde_yaml::from_reader(file)
            .map_err(|source| Error::Deserialize {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            path = %path.display(),
            plugin = config.auth.plugin.as_str(),
            "configuration loaded"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directory_configuration() {
        let config: Configuration = serde_yaml::from_str(
            r#"
name: esrf
auth:
  plugin: ad
  options:
    AD_URI: ldaps://ad.esrf.fr
    AD_BASE_DN: dc=esrf,dc=fr
    AD_DOMAIN: esrf.fr
    AD_STARTTLS: false
telemetry:
  otlp_endpoint: http://localhost:4317
"#,
        )
        .unwrap();

        assert_eq!(config.name, "esrf");
        assert_eq!(config.auth.plugin, BackendKind::Directory);
        assert_eq!(config.auth.options.get("AD_URI"), Some("ldaps://ad.esrf.fr"));
        assert_eq!(config.auth.options.get("AD_STARTTLS"), Some("false"));
        assert!(config.session.is_none());
        assert_eq!(
            config.telemetry.and_then(|t| t.otlp_endpoint).as_deref(),
            Some("http://localhost:4317")
        );
    }

    #[test]
    fn test_plugin_aliases() {
        for (raw, kind) in [
            ("ad", BackendKind::Directory),
            ("ldap", BackendKind::Directory),
            ("directory", BackendKind::Directory),
            ("local", BackendKind::Local),
            ("token", BackendKind::Token),
        ] {
            let auth: Auth =
                serde_yaml::from_str(&format!("plugin: {raw}")).unwrap();
            assert_eq!(auth.plugin, kind);
            assert_eq!(auth.options, Options::default());
        }

        assert!(serde_yaml::from_str::<Auth>("plugin: kerberos").is_err());
    }

    #[test]
    fn test_nested_option_is_rejected() {
        let res = serde_yaml::from_str::<Auth>(
            "plugin: ad\noptions:\n  AD_URI: [a, b]\n",
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_empty_option_is_missing() {
        let auth: Auth = serde_yaml::from_str(
            "plugin: ad\noptions:\n  AD_URI:\n  AD_DOMAIN: esrf.fr\n",
        )
        .unwrap();

        assert_eq!(auth.options.get("AD_URI"), None);
        assert_eq!(
            auth.options.require("AD_URI"),
            Err(AuthError::MissingSetting("AD_URI".into()))
        );
        assert_eq!(auth.options.get("AD_DOMAIN"), Some("esrf.fr"));
    }

    #[test]
    fn test_require_and_flag() {
        let options: Options = [
            ("AD_URI", "ldap://localhost"),
            ("AD_DOMAIN", "   "),
            ("AD_STARTTLS", "Yes"),
            ("BROKEN", "maybe"),
        ]
        .into_iter()
        .collect();

        assert_eq!(options.require("AD_URI"), Ok("ldap://localhost"));
        assert_eq!(
            options.require("AD_DOMAIN"),
            Err(AuthError::MissingSetting("AD_DOMAIN".into()))
        );
        assert_eq!(
            options.require("AD_BASE_DN"),
            Err(AuthError::MissingSetting("AD_BASE_DN".into()))
        );
        assert_eq!(options.flag("AD_STARTTLS", false), Ok(true));
        assert_eq!(options.flag("MISSING", true), Ok(true));
        assert!(options.flag("BROKEN", false).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Configuration::read(Some(Path::new("/nonexistent/config.yaml")));
        assert!(matches!(err, Err(Error::Io { .. })));
    }
}
