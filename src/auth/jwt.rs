use std::time::Duration;

use anyhow::Context;
use axum::extract::FromRef;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, HasKind, RefreshClaims, TokenKind};
use crate::auth::repo_types::User;
use crate::config::JwtConfig;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
    #[error("expected a {0:?} token")]
    WrongKind(TokenKind),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(err),
        }
    }
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Signing and verification keys for both token kinds. Built once from `JwtConfig`.
#[derive(Clone)]
pub struct JwtKeys {
    access: KeyPair,
    refresh: KeyPair,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            access: KeyPair::from_secret(&cfg.access_secret),
            refresh: KeyPair::from_secret(&cfg.refresh_secret),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: cfg.access_ttl,
            refresh_ttl: cfg.refresh_ttl,
        }
    }

    /// `(iat, exp)` for a token issued now.
    fn window(ttl: Duration) -> anyhow::Result<(usize, usize)> {
        let now = OffsetDateTime::now_utc();
        let exp = TimeDuration::try_from(ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .with_context(|| format!("token lifetime of {}s is out of range", ttl.as_secs()))?;
        Ok((now.unix_timestamp() as usize, exp.unix_timestamp() as usize))
    }

    fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> anyhow::Result<String> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, key)?)
    }

    pub fn sign_access(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.access_ttl)?;
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            fullname: user.fullname.clone(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            kind: TokenKind::Access,
        };
        let token = Self::sign(&claims, &self.access.encoding)?;
        debug!(user_id = %user.id, "access token signed");
        Ok(token)
    }

    pub fn sign_refresh(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.refresh_ttl)?;
        let claims = RefreshClaims {
            sub: user.id,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            kind: TokenKind::Refresh,
        };
        let token = Self::sign(&claims, &self.refresh.encoding)?;
        debug!(user_id = %user.id, "refresh token signed");
        Ok(token)
    }

    fn verify<T>(&self, token: &str, key: &DecodingKey, kind: TokenKind) -> Result<T, TokenError>
    where
        T: DeserializeOwned + HasKind,
    {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        let data = decode::<T>(token, key, &validation)?;
        if data.claims.kind() != kind {
            return Err(TokenError::WrongKind(kind));
        }
        Ok(data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.verify(token, &self.access.decoding, TokenKind::Access)?;
        debug!(user_id = %claims.sub, "access token verified");
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims =
            self.verify(token, &self.refresh.decoding, TokenKind::Refresh)?;
        debug!(user_id = %claims.sub, "refresh token verified");
        Ok(claims)
    }
}

#[cfg(test)]
pub(crate) fn test_jwt_config() -> JwtConfig {
    JwtConfig {
        access_secret: "test-access-secret".into(),
        refresh_secret: "test-refresh-secret".into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        access_ttl: Duration::from_secs(5 * 60),
        refresh_ttl: Duration::from_secs(60 * 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys() -> JwtKeys {
        JwtKeys::new(&test_jwt_config())
    }

    fn user() -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            username: "alice01".into(),
            email: "alice@x.com".into(),
            fullname: "Alice Liddell".into(),
            avatar: None,
            cover_image: None,
            password_hash: "unused".into(),
            refresh_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn access_token_round_trips_identity() {
        let keys = make_keys();
        let user = user();
        let token = keys.sign_access(&user).expect("sign access");
        let claims = keys.verify_access(&token).expect("verify access");
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.username, user.username);
        assert_eq!(claims.fullname, user.fullname);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn out_of_range_lifetime_fails_to_sign() {
        let mut cfg = test_jwt_config();
        cfg.refresh_ttl = Duration::from_secs(100_000_000 * 86_400);
        let keys = JwtKeys::new(&cfg);
        assert!(keys.sign_refresh(&user()).is_err());
        assert!(keys.sign_access(&user()).is_ok());
    }

    #[test]
    fn refresh_token_round_trips_id() {
        let keys = make_keys();
        let user = user();
        let token = keys.sign_refresh(&user).expect("sign refresh");
        let claims = keys.verify_refresh(&token).expect("verify refresh");
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.kind, TokenKind::Refresh);
    }

    #[test]
    fn refresh_tokens_are_unique_per_issue() {
        let keys = make_keys();
        let user = user();
        let a = keys.sign_refresh(&user).unwrap();
        let b = keys.sign_refresh(&user).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn secrets_are_not_interchangeable() {
        let keys = make_keys();
        let user = user();
        let access = keys.sign_access(&user).unwrap();
        let refresh = keys.sign_refresh(&user).unwrap();
        assert!(matches!(
            keys.verify_refresh(&access),
            Err(TokenError::Invalid(_))
        ));
        assert!(matches!(
            keys.verify_access(&refresh),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let keys = make_keys();
        let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
        // well past the default 60s leeway
        let claims = RefreshClaims {
            sub: Uuid::new_v4(),
            iat: now - 600,
            exp: now - 300,
            iss: keys.issuer.clone(),
            aud: keys.audience.clone(),
            jti: Uuid::new_v4(),
            kind: TokenKind::Refresh,
        };
        let token = JwtKeys::sign(&claims, &keys.refresh.encoding).unwrap();
        assert!(matches!(keys.verify_refresh(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn rejects_wrong_kind_under_right_secret() {
        let keys = make_keys();
        let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
        let claims = RefreshClaims {
            sub: Uuid::new_v4(),
            iat: now,
            exp: now + 300,
            iss: keys.issuer.clone(),
            aud: keys.audience.clone(),
            jti: Uuid::new_v4(),
            kind: TokenKind::Access,
        };
        let token = JwtKeys::sign(&claims, &keys.refresh.encoding).unwrap();
        assert!(matches!(
            keys.verify_refresh(&token),
            Err(TokenError::WrongKind(TokenKind::Refresh))
        ));
    }

    #[test]
    fn rejects_wrong_issuer_or_audience() {
        let good = make_keys();
        let mut cfg = test_jwt_config();
        cfg.issuer = "other-iss".into();
        cfg.audience = "other-aud".into();
        let bad = JwtKeys::new(&cfg);
        let token = good.sign_access(&user()).unwrap();
        assert!(bad.verify_access(&token).is_err());
    }

    #[test]
    fn rejects_malformed_and_missing_claims() {
        let keys = make_keys();
        assert!(keys.verify_access("not.a.jwt").is_err());
        assert!(keys.verify_access("").is_err());

        // refresh-shaped payload signed with the access secret lacks identity claims
        let user = user();
        let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
        let claims = RefreshClaims {
            sub: user.id,
            iat: now,
            exp: now + 300,
            iss: keys.issuer.clone(),
            aud: keys.audience.clone(),
            jti: Uuid::new_v4(),
            kind: TokenKind::Access,
        };
        let token = JwtKeys::sign(&claims, &keys.access.encoding).unwrap();
        assert!(matches!(
            keys.verify_access(&token),
            Err(TokenError::Invalid(_))
        ));
    }
}
