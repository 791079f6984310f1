//! Directory service client.
//!
//! One connection per authentication attempt: connect, simple bind, one
//! subtree search, close. Nothing is pooled nor retried.

pub mod attributes;
mod ldap;

use async_trait::async_trait;

pub use attributes::{DirectoryAttributeSet, map_attributes};
pub use ldap::LdapConnector;

use crate::error::Result;
use crate::identity::{Principal, Secret};

/// Opens connections to a directory endpoint.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Open a new connection to `uri`. Single attempt.
    async fn connect(&self, uri: &str) -> Result<Box<dyn DirectoryConnection>>;
}

/// A live directory connection.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Authenticate the connection as `principal`.
    async fn bind(&mut self, principal: &Principal, secret: &Secret)
    -> Result<()>;

    /// Return the attributes of the first entry matching `filter` under
    /// `base_dn`.
    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<DirectoryAttributeSet>;

    /// Release the connection.
    async fn close(&mut self);
}

/// Escape a value embedded in a search filter.
pub fn escape_filter_value(input: &str) -> String {
    ::ldap3::ldap_escape(input).into_owned()
}
