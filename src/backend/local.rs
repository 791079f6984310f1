//! Users declared in a local file.

use std::collections::HashMap;
use std::fs::File;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Authenticate, Configure};
use crate::config::Options;
use crate::crypto::PasswordManager;
use crate::error::{AuthError, Result};
use crate::identity::{GroupMembership, Login, UserIdentity};

pub const USERS_FILE: &str = "LOCAL_USERS_FILE";

const DECOY_PASSWORD: &str = "ispyb-unknown-user";

/// Entry of the users file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalUser {
    /// Argon2 PHC string.
    password: String,
    email: Option<String>,
    site_id: Option<String>,
    family_name: Option<String>,
    given_name: Option<String>,
    phone: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
}

impl LocalUser {
    fn identity(&self, login: &Login) -> UserIdentity {
        UserIdentity {
            login: login.as_str().to_owned(),
            email_address: self.email.clone(),
            site_id: self.site_id.clone(),
            family_name: self.family_name.clone(),
            given_name: self.given_name.clone(),
            phone_number: self.phone.clone(),
        }
    }
}

/// Password authentication against a YAML users file, loaded once.
pub struct LocalAuthentication {
    users: HashMap<String, LocalUser>,
    pwd: PasswordManager,
    /// Verified in place of a user hash when the login is unknown.
    decoy: String,
    #[cfg(test)]
    verifications: std::sync::atomic::AtomicUsize,
}

impl LocalAuthentication {
    /// Create a new [`LocalAuthentication`].
    ///
    /// Unknown logins are checked against a hash made with the parameters
    /// of a configured user, so they cost as much as a wrong password.
    pub fn new(
        users: HashMap<String, LocalUser>,
        pwd: PasswordManager,
    ) -> Result<Self> {
        let decoy = users
            .values()
            .next()
            .map(|user| PasswordManager::from_hash(&user.password))
            .unwrap_or_else(|| Ok(pwd.clone()))
            .and_then(|manager| manager.hash_password(DECOY_PASSWORD))
            .map_err(|err| AuthError::invalid_setting(USERS_FILE, err))?;

        Ok(Self {
            users,
            pwd,
            decoy,
            #[cfg(test)]
            verifications: Default::default(),
        })
    }

    fn verify(&self, password: &str, phc_hash: &str) -> bool {
        #[cfg(test)]
        self.verifications
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        self.pwd.verify_password(password, phc_hash).is_ok()
    }

    fn check(&self, login: &str, password: &str) -> Result<(Login, &LocalUser)> {
        let login = Login::new(login)?;

        let Some(user) = self.users.get(login.as_str()) else {
            self.verify(password, &self.decoy);
            tracing::debug!(%login, "unknown local user");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.verify(password, &user.password) {
            tracing::debug!(%login, "local password rejected");
            return Err(AuthError::InvalidCredentials);
        }

        Ok((login, user))
    }
}

impl Configure for LocalAuthentication {
    fn configure(options: &Options) -> Result<Self> {
        let path = options.require(USERS_FILE)?;

        let file = File::open(path)
            .map_err(|err| AuthError::invalid_setting(USERS_FILE, err))?;
        let users: HashMap<String, LocalUser> = serde_yaml::from_reader(file)
            .map_err(|err| AuthError::invalid_setting(USERS_FILE, err))?;

        for (login, user) in &users {
            PasswordManager::check_hash(&user.password).map_err(|err| {
                AuthError::invalid_setting(
                    USERS_FILE,
                    format!("user `{login}`: {err}"),
                )
            })?;
        }

        let pwd = PasswordManager::new(None)
            .map_err(|err| AuthError::invalid_setting(USERS_FILE, err))?;

        tracing::debug!(%path, users = users.len(), "local users loaded");
        Self::new(users, pwd)
    }
}

#[async_trait]
impl Authenticate for LocalAuthentication {
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<(UserIdentity, GroupMembership)> {
        let (login, user) = self.check(login, password)?;
        Ok((user.identity(&login), user.groups.clone().into()))
    }

    async fn get_user_and_groups(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        _token: Option<&str>,
    ) -> Result<(String, GroupMembership)> {
        let username = username.ok_or(AuthError::EmptyLogin)?;
        let password = password.ok_or(AuthError::InvalidCredentials)?;

        let (login, user) = self.check(username, password)?;
        Ok((login.to_string(), user.groups.clone().into()))
    }
}
