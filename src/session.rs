//! Manage session json web tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::identity::{GroupMembership, UserIdentity};

const DEFAULT_AUDIENCE: &str = "ispyb";
pub const EXPIRATION_TIME: u64 = 60 * 15; // 15 minutes.

type Result<T> = std::result::Result<T, SessionError>;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("system clock is before unix epoch")]
    Clock(#[from] std::time::SystemTimeError),
    #[error("token manager has no private key")]
    ReadOnly,
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Recipients that the JWT is intended for.
    pub aud: String,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: u64,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the organization that issued the JWT.
    pub iss: String,
    /// User login.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub groups: GroupMembership,
}

impl Claims {
    /// Identity asserted by the token.
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            login: self.sub.clone(),
            email_address: self.email.clone(),
            site_id: self.site_id.clone(),
            family_name: self.family_name.clone(),
            given_name: self.given_name.clone(),
            phone_number: self.phone_number.clone(),
        }
    }
}

/// Issue and check session tokens.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    public_key: DecodingKey,
    private_key: Option<EncodingKey>,
    issuer: Option<String>,
    audience: String,
    expires_in: u64,
}

impl TokenManager {
    /// Create a new [`TokenManager`] instance.
    pub fn new(
        issuer: &str,
        public_key_pem: &str,
        private_key_pem: &str,
    ) -> Result<Self> {
        let mut manager = Self::verifier(public_key_pem)?;
        manager.private_key =
            Some(EncodingKey::from_ec_pem(private_key_pem.as_bytes())?);
        manager.issuer = Some(issuer.to_owned());
        Ok(manager)
    }

    /// Create a [`TokenManager`] only able to decode tokens.
    pub fn verifier(public_key_pem: &str) -> Result<Self> {
        Ok(Self {
            algorithm: Algorithm::ES384,
            public_key: DecodingKey::from_ec_pem(public_key_pem.as_bytes())?,
            private_key: None,
            issuer: None,
            audience: DEFAULT_AUDIENCE.to_string(),
            expires_in: EXPIRATION_TIME,
        })
    }

    /// Set `audience` field on JWT.
    pub fn audience(&mut self, audience: &str) {
        self.audience = audience.to_owned();
    }

    /// Only accept tokens from `issuer`.
    pub fn issuer(&mut self, issuer: &str) {
        self.issuer = Some(issuer.to_owned());
    }

    /// Token lifetime, in seconds.
    pub fn expires_in(&mut self, seconds: u64) {
        self.expires_in = seconds;
    }

    pub fn lifetime(&self) -> u64 {
        self.expires_in
    }

    /// Create a new token for `identity`.
    pub fn create(
        &self,
        identity: &UserIdentity,
        groups: &GroupMembership,
    ) -> Result<String> {
        let Some(private_key) = &self.private_key else {
            return Err(SessionError::ReadOnly);
        };

        let time = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let claims = Claims {
            aud: self.audience.clone(),
            exp: time + self.expires_in,
            iat: time,
            iss: self.issuer.clone().unwrap_or_default(),
            sub: identity.login.clone(),
            email: identity.email_address.clone(),
            site_id: identity.site_id.clone(),
            family_name: identity.family_name.clone(),
            given_name: identity.given_name.clone(),
            phone_number: identity.phone_number.clone(),
            groups: groups.clone(),
        };

        Ok(encode(&Header::new(self.algorithm), &claims, private_key)?)
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.audience]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(decode::<Claims>(token, &self.public_key, &validation)?.claims)
    }
}
