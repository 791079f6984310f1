//! Session token authentication.

use async_trait::async_trait;

use super::{Authenticate, Configure};
use crate::config::Options;
use crate::error::{AuthError, Result};
use crate::identity::{GroupMembership, Login, UserIdentity};
use crate::session::{Claims, TokenManager};

pub const PUBLIC_KEY: &str = "TOKEN_PUBLIC_KEY";
pub const AUDIENCE: &str = "TOKEN_AUDIENCE";
pub const ISSUER: &str = "TOKEN_ISSUER";

/// Accepts session tokens previously issued by a [`TokenManager`].
pub struct TokenAuthentication {
    verifier: TokenManager,
}

impl TokenAuthentication {
    /// Create a new [`TokenAuthentication`].
    pub fn new(verifier: TokenManager) -> Self {
        Self { verifier }
    }

    fn verify(&self, token: Option<&str>) -> Result<Claims> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidCredentials)?;
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        self.verifier.decode(token).map_err(|err| {
            tracing::debug!(error = %err, "session token rejected");
            AuthError::InvalidCredentials
        })
    }
}

/// Reject tokens issued to someone else.
fn ensure_subject(claims: &Claims, login: &Login) -> Result<()> {
    if claims.sub == login.as_str() {
        Ok(())
    } else {
        tracing::warn!(%login, subject = %claims.sub, "token subject mismatch");
        Err(AuthError::InvalidCredentials)
    }
}

impl Configure for TokenAuthentication {
    fn configure(options: &Options) -> Result<Self> {
        let public_key = options.require(PUBLIC_KEY)?;

        let mut verifier = TokenManager::verifier(public_key)
            .map_err(|err| AuthError::invalid_setting(PUBLIC_KEY, err))?;
        if let Some(audience) = options.get(AUDIENCE) {
            verifier.audience(audience);
        }
        if let Some(issuer) = options.get(ISSUER) {
            verifier.issuer(issuer);
        }

        Ok(Self::new(verifier))
    }
}

#[async_trait]
impl Authenticate for TokenAuthentication {
    /// `password` carries the session token.
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<(UserIdentity, GroupMembership)> {
        let login = Login::new(login)?;
        let claims = self.verify(Some(password))?;
        ensure_subject(&claims, &login)?;

        Ok((claims.identity(), claims.groups))
    }

    async fn get_user_and_groups(
        &self,
        username: Option<&str>,
        _password: Option<&str>,
        token: Option<&str>,
    ) -> Result<(String, GroupMembership)> {
        let claims = self.verify(token)?;

        if let Some(username) = username.filter(|u| !u.trim().is_empty()) {
            ensure_subject(&claims, &Login::new(username)?)?;
        }

        Ok((claims.sub, claims.groups))
    }
}
