//! Active Directory / LDAP authentication.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::{Authenticate, Configure};
use crate::config::Options;
use crate::directory::attributes::REQUESTED;
use crate::directory::{
    DirectoryConnection, DirectoryConnector, LdapConnector, escape_filter_value,
    map_attributes,
};
use crate::error::{AuthError, Result};
use crate::identity::{GroupMembership, Login, Principal, Secret, UserIdentity};

pub const URI: &str = "AD_URI";
pub const BASE_DN: &str = "AD_BASE_DN";
pub const DOMAIN: &str = "AD_DOMAIN";
pub const STARTTLS: &str = "AD_STARTTLS";

const SCHEMES: [&str; 3] = ["ldap", "ldaps", "ldapi"];

/// Static directory settings, read-only once configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// Endpoint, such as `ldaps://ad.example.com`.
    pub uri: String,
    /// Search base.
    pub base_dn: String,
    /// Suffix appended to logins to form the bind principal.
    pub domain: String,
    /// Demand StartTLS on plain `ldap://` connections.
    pub starttls: bool,
}

impl DirectoryConfig {
    /// Read the settings from backend options.
    pub fn from_options(options: &Options) -> Result<Self> {
        let uri = options.require(URI)?;
        let base_dn = options.require(BASE_DN)?;
        let domain = options.require(DOMAIN)?;
        let starttls = options.flag(STARTTLS, false)?;

        let parsed =
            Url::parse(uri).map_err(|err| AuthError::invalid_setting(URI, err))?;
        if !SCHEMES.contains(&parsed.scheme()) {
            return Err(AuthError::invalid_setting(
                URI,
                format!("unsupported scheme `{}`", parsed.scheme()),
            ));
        }

        Ok(Self {
            uri: uri.to_owned(),
            base_dn: base_dn.to_owned(),
            domain: domain.trim_start_matches('@').to_owned(),
            starttls,
        })
    }
}

/// Validates credentials with a simple bind, then reads the user entry.
///
/// Each call opens its own connection and closes it before returning.
pub struct DirectoryAuthentication {
    config: DirectoryConfig,
    connector: Arc<dyn DirectoryConnector>,
}

impl DirectoryAuthentication {
    /// Create a new [`DirectoryAuthentication`].
    pub fn new(
        config: DirectoryConfig,
        connector: impl DirectoryConnector + 'static,
    ) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Bind as `login@domain` and fetch the identity and groups of `login`.
    async fn lookup(
        &self,
        login: &str,
        password: &str,
    ) -> Result<(UserIdentity, GroupMembership)> {
        let login = Login::new(login).inspect_err(|_| {
            tracing::debug!("can not authenticate without login");
        })?;
        let secret = Secret::new(password);
        if secret.is_empty() {
            // an empty simple bind is an anonymous bind.
            tracing::debug!(%login, "can not authenticate without password");
            return Err(AuthError::InvalidCredentials);
        }

        let principal = Principal::new(login, &self.config.domain);
        tracing::debug!(%principal, "try to authenticate user");

        let mut conn = self.connector.connect(&self.config.uri).await?;
        let outcome = self.bind_and_search(conn.as_mut(), &principal, &secret).await;
        conn.close().await;

        outcome
    }

    async fn bind_and_search(
        &self,
        conn: &mut dyn DirectoryConnection,
        principal: &Principal,
        secret: &Secret,
    ) -> Result<(UserIdentity, GroupMembership)> {
        conn.bind(principal, secret).await?;
        tracing::debug!(%principal, "user authenticated, fetching attributes");

        let filter = format!(
            "(sAMAccountName={})",
            escape_filter_value(principal.login().as_str())
        );
        let attrs = conn
            .search(&self.config.base_dn, &filter, &REQUESTED)
            .await
            .inspect_err(|err| {
                if *err == AuthError::UserNotFound {
                    tracing::warn!(
                        %principal,
                        base_dn = %self.config.base_dn,
                        "user bound but has no entry under the search base"
                    );
                }
            })?;

        Ok(map_attributes(principal.login(), &attrs))
    }
}

impl Configure for DirectoryAuthentication {
    fn configure(options: &Options) -> Result<Self> {
        let config = DirectoryConfig::from_options(options)?;
        let connector = LdapConnector::new(config.starttls);
        Ok(Self::new(config, connector))
    }
}

#[async_trait]
impl Authenticate for DirectoryAuthentication {
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<(UserIdentity, GroupMembership)> {
        self.lookup(login, password).await
    }

    async fn get_user_and_groups(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        _token: Option<&str>,
    ) -> Result<(String, GroupMembership)> {
        let username = username.ok_or(AuthError::EmptyLogin)?;
        let password = password.ok_or(AuthError::InvalidCredentials)?;

        self.lookup(username, password)
            .await
            .map(|(identity, groups)| (identity.login, groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::attributes::{
        FAMILY_NAME, GIVEN_NAME, MAIL, MEMBER_OF, PHONE, SITE_ID,
    };
    use crate::directory::testing::MemoryDirectory;

    fn config() -> DirectoryConfig {
        DirectoryConfig {
            uri: "ldap://ad.example.com".into(),
            base_dn: "dc=example,dc=com".into(),
            domain: "example.com".into(),
            starttls: false,
        }
    }

    fn directory() -> MemoryDirectory {
        MemoryDirectory::default()
            .with_account(
                "alice@example.com",
                "wonderland",
                "alice",
                &[
                    (MAIL, &["alice@example.com"]),
                    (SITE_ID, &["1042"]),
                    (FAMILY_NAME, &["Liddell"]),
                    (GIVEN_NAME, &["Alice"]),
                    (MEMBER_OF, &["cn=admins,dc=example,dc=com"]),
                    ("description", &["never requested"]),
                ],
            )
            // provisioned in the domain but outside the search base.
            .with_account("bob@example.com", "builder", "robert", &[])
    }

    #[tokio::test]
    async fn test_authenticate_alice() {
        let directory = directory();
        let counters = directory.counters.clone();
        let last_search = directory.last_search.clone();
        let auth = DirectoryAuthentication::new(config(), directory);

        let identity = auth
            .authenticate_by_login("alice", "wonderland")
            .await
            .unwrap();
        assert_eq!(
            identity,
            UserIdentity {
                login: "alice".into(),
                email_address: Some("alice@example.com".into()),
                site_id: Some("1042".into()),
                family_name: Some("Liddell".into()),
                given_name: Some("Alice".into()),
                phone_number: None,
            }
        );

        let (base_dn, filter, attributes) =
            last_search.lock().unwrap().clone().unwrap();
        assert_eq!(base_dn, "dc=example,dc=com");
        assert_eq!(filter, "(sAMAccountName=alice)");
        assert_eq!(
            attributes,
            vec![MAIL, SITE_ID, FAMILY_NAME, GIVEN_NAME, PHONE, MEMBER_OF]
        );

        assert_eq!(counters.opened(), 1);
        assert_eq!(counters.closed(), 1);
    }

    #[tokio::test]
    async fn test_authenticate_is_one_round_trip() {
        let directory = directory();
        let counters = directory.counters.clone();
        let auth = DirectoryAuthentication::new(config(), directory);

        let (identity, groups) =
            auth.authenticate("alice", "wonderland").await.unwrap();
        assert_eq!(identity.login, "alice");
        assert_eq!(groups.into_vec(), vec!["cn=admins,dc=example,dc=com"]);

        assert_eq!(counters.opened(), 1);
        assert_eq!(counters.binds(), 1);
        assert_eq!(counters.searches(), 1);
        assert_eq!(counters.closed(), 1);
    }

    #[tokio::test]
    async fn test_groups_of_alice() {
        let auth = DirectoryAuthentication::new(config(), directory());

        let (username, groups) = auth
            .get_user_and_groups(Some(" alice "), Some("wonderland"), None)
            .await
            .unwrap();
        assert_eq!(username, "alice");
        assert_eq!(groups.into_vec(), vec!["cn=admins,dc=example,dc=com"]);
    }

    #[tokio::test]
    async fn test_whitespace_login_never_connects() {
        let directory = directory();
        let counters = directory.counters.clone();
        let auth = DirectoryAuthentication::new(config(), directory);

        for login in ["", " ", "  ", "\t\n"] {
            assert_eq!(
                auth.authenticate_by_login(login, "wonderland").await,
                Err(AuthError::EmptyLogin)
            );
            assert_eq!(
                auth.get_user_and_groups(Some(login), Some("x"), None).await,
                Err(AuthError::EmptyLogin)
            );
        }
        assert_eq!(
            auth.get_user_and_groups(None, Some("x"), None).await,
            Err(AuthError::EmptyLogin)
        );

        assert_eq!(counters.opened(), 0);
    }

    #[tokio::test]
    async fn test_empty_password_never_binds() {
        let directory = directory();
        let counters = directory.counters.clone();
        let auth = DirectoryAuthentication::new(config(), directory);

        assert_eq!(
            auth.authenticate_by_login("alice", "").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            auth.get_user_and_groups(Some("alice"), None, Some("token"))
                .await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(counters.opened(), 0);
    }

    #[tokio::test]
    async fn test_wrong_password_closes_connection() {
        let directory = directory();
        let counters = directory.counters.clone();
        let auth = DirectoryAuthentication::new(config(), directory);

        assert_eq!(
            auth.authenticate_by_login("alice", "looking-glass").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            auth.authenticate_by_login("mallory", "wonderland").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            auth.get_user_and_groups(Some("alice"), Some("nope"), None)
                .await,
            Err(AuthError::InvalidCredentials)
        );

        assert_eq!(counters.opened(), 3);
        assert_eq!(counters.closed(), 3);
        assert_eq!(counters.searches(), 0);
    }

    #[tokio::test]
    async fn test_bound_without_entry_is_user_not_found() {
        let directory = directory();
        let counters = directory.counters.clone();
        let auth = DirectoryAuthentication::new(config(), directory);

        assert_eq!(
            auth.authenticate_by_login("bob", "builder").await,
            Err(AuthError::UserNotFound)
        );
        assert_eq!(
            auth.get_user_and_groups(Some("bob"), Some("builder"), None)
                .await,
            Err(AuthError::UserNotFound)
        );

        assert_eq!(counters.binds(), 2);
        assert_eq!(counters.opened(), counters.closed());
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        let directory = MemoryDirectory {
            unreachable: true,
            ..directory()
        };
        let auth = DirectoryAuthentication::new(config(), directory);

        assert!(matches!(
            auth.authenticate_by_login("alice", "wonderland").await,
            Err(AuthError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_authentication_is_idempotent() {
        let directory = directory();
        let counters = directory.counters.clone();
        let auth = DirectoryAuthentication::new(config(), directory);

        let first = auth.authenticate_by_login("alice", "wonderland").await;
        let second = auth.authenticate_by_login("alice", "wonderland").await;
        assert!(first.is_ok());
        assert_eq!(first, second);

        // no connection is shared between calls.
        assert_eq!(counters.opened(), 2);
        assert_eq!(counters.closed(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_attempts_are_independent() {
        let directory = directory();
        let counters = directory.counters.clone();
        let auth = Arc::new(DirectoryAuthentication::new(config(), directory));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let auth = Arc::clone(&auth);
                tokio::spawn(async move {
                    let password = if i % 2 == 0 { "wonderland" } else { "bad" };
                    auth.authenticate_by_login("alice", password).await
                })
            })
            .collect();

        for (i, task) in tasks.into_iter().enumerate() {
            let result = task.await.unwrap();
            if i % 2 == 0 {
                assert_eq!(result.unwrap().login, "alice");
            } else {
                assert_eq!(result, Err(AuthError::InvalidCredentials));
            }
        }
        assert_eq!(counters.opened(), 8);
        assert_eq!(counters.closed(), 8);
    }

    #[test]
    fn test_configure() {
        let mut options: Options = [
            (URI, "ldaps://ad.example.com:636"),
            (BASE_DN, "dc=example,dc=com"),
            (DOMAIN, "@example.com"),
        ]
        .into_iter()
        .collect();

        let auth = DirectoryAuthentication::configure(&options).unwrap();
        assert_eq!(auth.config().domain, "example.com");
        assert!(!auth.config().starttls);

        options.insert(STARTTLS, "true");
        let auth = DirectoryAuthentication::configure(&options).unwrap();
        assert!(auth.config().starttls);

        options.insert(URI, "https://ad.example.com");
        assert!(matches!(
            DirectoryAuthentication::configure(&options),
            Err(AuthError::InvalidSetting { .. })
        ));

        options.insert(URI, "::not a uri::");
        assert!(matches!(
            DirectoryAuthentication::configure(&options),
            Err(AuthError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_configure_names_missing_key() {
        for missing in [URI, BASE_DN, DOMAIN] {
            let options: Options = [
                (URI, "ldap://ad.example.com"),
                (BASE_DN, "dc=example,dc=com"),
                (DOMAIN, "example.com"),
            ]
            .into_iter()
            .filter(|(key, _)| *key != missing)
            .collect();

            assert_eq!(
                DirectoryAuthentication::configure(&options).err(),
                Some(AuthError::MissingSetting(missing.to_owned()))
            );
        }
    }
}
