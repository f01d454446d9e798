use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};

use crate::{
    auth::repo,
    config::SessionConfig,
    error::AppError,
    state::AppState,
    storage::PartyId,
};

pub const SESSION_COOKIE: &str = "session";

/// Session token payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub ver: i64,    // users.sessionVersion at signing time
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
}

#[derive(Clone)]
pub struct SessionKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
    pub secure_cookie: bool,
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::from_config(&state.config.session)
    }
}

impl SessionKeys {
    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(1) as u64) * 60),
            secure_cookie: cfg.secure_cookie,
        }
    }

    pub fn sign(&self, user_id: i64, session_version: i64) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id.to_string(),
            ver: session_version,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id, "session signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .secure(self.secure_cookie)
            .max_age(TimeDuration::seconds(self.ttl.as_secs() as i64))
            .build()
    }
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}

/// The logged-in admin. The party always comes from the user row, never
/// from the request.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: i64,
    pub username: String,
    pub party: PartyId,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(AppError::Unauthorized)?;

        let keys = SessionKeys::from_ref(state);
        let claims = keys.verify(&token).map_err(|e| {
            warn!(error = %e, "invalid or expired session");
            AppError::Unauthorized
        })?;
        let user_id: i64 = claims.sub.parse().map_err(|_| AppError::Unauthorized)?;

        let user = repo::find_by_id(&state.db, user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if claims.ver != user.session_version {
            warn!(user_id, "session revoked by logout or password change");
            return Err(AppError::Unauthorized);
        }
        let party = PartyId::parse(&user.party_id).map_err(|_| {
            warn!(user_id, party = %user.party_id, "user has an unusable party id");
            AppError::Unauthorized
        })?;

        Ok(AuthSession {
            user_id,
            username: user.username,
            party,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(secret: &str, issuer: &str, audience: &str) -> SessionKeys {
        SessionKeys::from_config(&SessionConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 5,
            secure_cookie: false,
        })
    }

    #[test]
    fn sign_and_verify() {
        let k = keys("dev-secret", "iss", "aud");
        let token = k.sign(42, 3).expect("sign");
        let claims = k.verify(&token).expect("verify");
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.ver, 3);
        assert_eq!(claims.iss, "iss");
        assert_eq!(claims.aud, "aud");
    }

    #[test]
    fn verify_rejects_other_secret_or_audience() {
        let token = keys("a", "iss", "aud").sign(1, 0).unwrap();
        assert!(keys("b", "iss", "aud").verify(&token).is_err());
        assert!(keys("a", "iss", "other").verify(&token).is_err());
        assert!(keys("a", "other", "aud").verify(&token).is_err());
    }

    #[test]
    fn cookie_is_http_only() {
        let c = keys("s", "i", "a").cookie("tok".into());
        assert_eq!(c.name(), SESSION_COOKIE);
        assert_eq!(c.value(), "tok");
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.path(), Some("/"));
    }
}
