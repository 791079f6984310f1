//! Authentication core for the ISPyB laboratory information management API.
//!
//! Login endpoints hand a username and password to an [`Authenticator`]
//! and get back a [`UserIdentity`] and its groups. The main backend binds
//! against an Active Directory / LDAP server; local users and session
//! tokens are also supported.

#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod identity;
pub mod session;
pub mod telemetry;

pub use backend::{Authenticate, Authenticator, Configure};
pub use config::{BackendKind, Configuration, Options};
pub use error::{AuthError, Result};
pub use identity::{GroupMembership, UserIdentity};

/// Everything a login endpoint needs, built once at startup.
pub struct AppState {
    pub config: config::Configuration,
    pub authenticator: Authenticator,
    pub token: Option<session::TokenManager>,
}

/// Initialize the application state from the configuration.
pub fn initialize_state(
    config: config::Configuration,
) -> std::result::Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
    let authenticator = Authenticator::from_config(&config.auth)?;

    // handle session tokens.
    let token = match &config.session {
        Some(session) => {
            let mut token = session::TokenManager::new(
                &session.issuer,
                &session.public_key_pem,
                &session.private_key_pem,
            )?;
            if let Some(audience) = &session.audience {
                token.audience(audience);
            }
            if let Some(expires_in) = session.expires_in {
                token.expires_in(expires_in);
            }
            Some(token)
        },
        None => {
            tracing::warn!("missing `session` entry, no token will be issued");
            None
        },
    };

    Ok(AppState {
        config,
        authenticator,
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_state() {
        let config: Configuration = serde_yaml::from_str(&format!(
            r#"
auth:
  plugin: token
  options:
    TOKEN_PUBLIC_KEY: "{public}"
session:
  issuer: https://ispyb.esrf.fr
  expires_in: 60
  public_key_pem: "{public}"
  private_key_pem: "{private}"
"#,
            public = session::tests::PUBLIC_KEY.replace('\n', "\\n"),
            private = session::tests::PRIVATE_KEY.replace('\n', "\\n"),
        ))
        .unwrap();

        let state = initialize_state(config).unwrap();
        assert_eq!(state.config.name, "ispyb");
        assert_eq!(state.authenticator.kind(), BackendKind::Token);
        assert_eq!(state.token.map(|t| t.lifetime()), Some(60));
    }

    #[test]
    fn test_initialize_state_fails_fast() {
        let config: Configuration =
            serde_yaml::from_str("auth:\n  plugin: ad\n").unwrap();

        let err = initialize_state(config).err().unwrap();
        assert_eq!(err.to_string(), "missing required setting `AD_URI`");
    }
}
