//! LDAP support.

use async_trait::async_trait;
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapResult, Scope, SearchEntry,
    SearchResult,
};

use super::{DirectoryAttributeSet, DirectoryConnection, DirectoryConnector};
use crate::error::{AuthError, Result};
use crate::identity::{Principal, Secret};

// https://www.rfc-editor.org/rfc/rfc4511#appendix-A.
const SUCCESS: u32 = 0;
const NO_SUCH_OBJECT: u32 = 32;
const INAPPROPRIATE_AUTHENTICATION: u32 = 48;
const INVALID_CREDENTIALS: u32 = 49;
const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
const UNWILLING_TO_PERFORM: u32 = 53;

/// Opens [`ldap3`] connections.
#[derive(Debug, Clone, Default)]
pub struct LdapConnector {
    starttls: bool,
}

impl LdapConnector {
    /// Create a new [`LdapConnector`].
    pub fn new(starttls: bool) -> Self {
        Self { starttls }
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self, uri: &str) -> Result<Box<dyn DirectoryConnection>> {
        let settings = LdapConnSettings::new().set_starttls(self.starttls);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, uri)
            .await
            .map_err(|err| {
                tracing::error!(%uri, error = %err, "cannot reach directory");
                AuthError::connection(err)
            })?;
        ldap3::drive!(conn);

        tracing::debug!(%uri, starttls = self.starttls, "directory connected");
        Ok(Box::new(LdapConnection { ldap }))
    }
}

/// A single [`Ldap`] handle. Dropping it ends the connection driver.
struct LdapConnection {
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(
        &mut self,
        principal: &Principal,
        secret: &Secret,
    ) -> Result<()> {
        let who = principal.to_string();
        let result = self
            .ldap
            .simple_bind(&who, secret.expose())
            .await
            .map_err(AuthError::connection)?;

        bind_outcome(&result).inspect_err(|err| {
            if *err == AuthError::InvalidCredentials {
                tracing::warn!(principal = %who, rc = result.rc, "bind rejected");
            }
        })
    }

    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<DirectoryAttributeSet> {
        let result = self
            .ldap
            .search(base_dn, Scope::Subtree, filter, attributes.to_vec())
            .await
            .map_err(AuthError::connection)?;

        search_outcome(result)
    }

    async fn close(&mut self) {
        if let Err(err) = self.ldap.unbind().await {
            tracing::debug!(error = %err, "unbind failed, dropping connection");
        }
    }
}

/// Classify the result of a simple bind.
fn bind_outcome(result: &LdapResult) -> Result<()> {
    match result.rc {
        SUCCESS => Ok(()),
        INAPPROPRIATE_AUTHENTICATION
        | INVALID_CREDENTIALS
        | INSUFFICIENT_ACCESS_RIGHTS
        | UNWILLING_TO_PERFORM => Err(AuthError::InvalidCredentials),
        _ => Err(unexpected(result)),
    }
}

/// Classify a search and keep its first entry.
fn search_outcome(
    SearchResult(entries, result): SearchResult,
) -> Result<DirectoryAttributeSet> {
    match result.rc {
        SUCCESS => {},
        NO_SUCH_OBJECT => return Err(AuthError::UserNotFound),
        INSUFFICIENT_ACCESS_RIGHTS => {
            return Err(AuthError::InvalidCredentials);
        },
        _ => return Err(unexpected(&result)),
    }

    // Active Directory appends continuation references to results.
    entries
        .into_iter()
        .find(|entry| !entry.is_ref())
        .map(|entry| SearchEntry::construct(entry).into())
        .ok_or(AuthError::UserNotFound)
}

fn unexpected(result: &LdapResult) -> AuthError {
    tracing::error!(rc = result.rc, text = %result.text, "unexpected directory result");
    AuthError::Connection(format!(
        "directory returned code {}: {}",
        result.rc, result.text
    ))
}
