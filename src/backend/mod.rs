//! Authentication backends.
//!
//! Every backend implements [`Configure`] and [`Authenticate`]; the rest of
//! the system only holds an [`Authenticator`], selected once at startup.

pub mod directory;
pub mod local;
pub mod token;

use std::time::Instant;

use async_trait::async_trait;
use tracing::Instrument;

pub use directory::DirectoryAuthentication;
pub use local::LocalAuthentication;
pub use token::TokenAuthentication;

use crate::config::{Auth, BackendKind, Options};
use crate::error::{AuthError, Result};
use crate::identity::{GroupMembership, UserIdentity};

/// Build a backend from its flat options.
pub trait Configure: Sized {
    /// Fails on the first missing or invalid setting.
    fn configure(options: &Options) -> Result<Self>;
}

/// Operations every backend provides.
#[async_trait]
pub trait Authenticate: Send + Sync {
    /// Check `password` for `login`, returning the identity and its groups
    /// from a single backend lookup.
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<(UserIdentity, GroupMembership)>;

    /// Check `password` for `login` and return the matching identity.
    async fn authenticate_by_login(
        &self,
        login: &str,
        password: &str,
    ) -> Result<UserIdentity> {
        self.authenticate(login, password)
            .await
            .map(|(identity, _)| identity)
    }

    /// Return the username and its groups.
    async fn get_user_and_groups(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        token: Option<&str>,
    ) -> Result<(String, GroupMembership)>;
}

/// Configured backend.
pub enum Authenticator {
    Directory(DirectoryAuthentication),
    Local(LocalAuthentication),
    Token(TokenAuthentication),
}

impl Authenticator {
    /// Configure the backend of `kind`.
    pub fn configure(kind: BackendKind, options: &Options) -> Result<Self> {
        let backend = match kind {
            BackendKind::Directory => {
                Self::Directory(DirectoryAuthentication::configure(options)?)
            },
            BackendKind::Local => {
                Self::Local(LocalAuthentication::configure(options)?)
            },
            BackendKind::Token => {
                Self::Token(TokenAuthentication::configure(options)?)
            },
        };

        tracing::info!(backend = kind.as_str(), "authentication backend ready");
        Ok(backend)
    }

    /// Configure the backend described in the `auth` section.
    pub fn from_config(config: &Auth) -> Result<Self> {
        Self::configure(config.plugin, &config.options)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Authenticator::Directory(_) => BackendKind::Directory,
            Authenticator::Local(_) => BackendKind::Local,
            Authenticator::Token(_) => BackendKind::Token,
        }
    }

    fn backend(&self) -> &dyn Authenticate {
        match self {
            Authenticator::Directory(backend) => backend,
            Authenticator::Local(backend) => backend,
            Authenticator::Token(backend) => backend,
        }
    }
}

#[async_trait]
impl Authenticate for Authenticator {
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<(UserIdentity, GroupMembership)> {
        let backend = self.kind().as_str();
        let span = tracing::info_span!("authenticate", backend, login);

        let start = Instant::now();
        let result = self
            .backend()
            .authenticate(login, password)
            .instrument(span)
            .await;
        record(backend, start, &result);

        result
    }

    async fn get_user_and_groups(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        token: Option<&str>,
    ) -> Result<(String, GroupMembership)> {
        let backend = self.kind().as_str();
        let span = tracing::info_span!(
            "get_user_and_groups",
            backend,
            username = username.unwrap_or_default()
        );

        let start = Instant::now();
        let result = self
            .backend()
            .get_user_and_groups(username, password, token)
            .instrument(span)
            .await;
        record(backend, start, &result);

        result
    }
}

fn record<T>(backend: &'static str, start: Instant, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(err) => err.kind(),
    };

    match result {
        Ok(_) => tracing::debug!(backend, "authentication succeeded"),
        Err(AuthError::Connection(err)) => {
            tracing::error!(backend, error = %err, "authentication backend failure")
        },
        Err(_) => tracing::info!(backend, outcome, "authentication refused"),
    }

    metrics::counter!(
        "auth_attempts_total",
        "backend" => backend,
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("auth_duration_seconds", "backend" => backend)
        .record(start.elapsed().as_secs_f64());
}
