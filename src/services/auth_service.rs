use axum::http;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::{sync::Cache, Expiry};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEV_USER_ID: &str = "dev-user";
const DEV_USERNAME: &str = "Developer";
const JWT_LEEWAY_SECS: u64 = 60;

/// A verified user, as handed to the collaboration engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token does not carry a user id")]
    MissingSubject,
    #[error("Token verification is not configured")]
    NotConfigured,
}

#[derive(Clone)]
struct CachedIdentity {
    identity: Identity,
    /// Unix time after which the token no longer validates
    valid_until: i64,
}

/// Evicts a cached identity once its token has expired
struct TokenExpiry;

impl Expiry<String, CachedIdentity> for TokenExpiry {
    fn expire_after_create(&self, _token: &String, cached: &CachedIdentity, _created_at: Instant) -> Option<Duration> {
        let remaining = cached.valid_until - chrono::Utc::now().timestamp();
        Some(Duration::from_secs(remaining.max(0) as u64))
    }
}

/// Verifies the two accepted credential forms: the configured development
/// bypass token and HS256 signed user tokens.
pub struct Authenticator {
    jwt_secret: Option<String>,
    dev_token: Option<String>,
    verified: Cache<String, CachedIdentity>,
}

impl Authenticator {
    pub fn new(jwt_secret: Option<String>, dev_token: Option<String>) -> Self {
        if dev_token.is_some() {
            warn!("Development bypass token is enabled");
        }
        if jwt_secret.is_none() {
            warn!("No JWT secret configured, signed tokens will be rejected");
        }
        Self {
            jwt_secret,
            dev_token,
            verified: Cache::builder()
                .max_capacity(100_000)
                .time_to_idle(Duration::from_secs(5 * 60))
                .expire_after(TokenExpiry)
                .build(),
        }
    }

    /// Verify a credential; claimed values only fill gaps the token leaves open.
    pub fn verify(
        &self,
        token: &str,
        claimed_user_id: Option<&str>,
        claimed_name: Option<&str>,
    ) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        if self.dev_token.as_deref() == Some(token) {
            let user_id = claimed_user_id.filter(|u| !u.is_empty()).unwrap_or(DEV_USER_ID);
            let username = claimed_name.filter(|n| !n.is_empty()).unwrap_or(DEV_USERNAME);
            debug!("Development token accepted for user {}", user_id);
            return Ok(Identity {
                user_id: user_id.to_string(),
                username: username.to_string(),
            });
        }

        if let Some(cached) = self.verified.get(token) {
            if cached.valid_until > chrono::Utc::now().timestamp() {
                return Ok(cached.identity);
            }
            self.verified.invalidate(token);
        }

        let secret = self.jwt_secret.as_deref().ok_or(AuthError::NotConfigured)?;
        let token_data = validate_jwt(token, secret).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let user_id = token_data
            .claims
            .get("sub")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSubject)?
            .to_string();
        let username = token_data
            .claims
            .get("name")
            .or_else(|| token_data.claims.get("username"))
            .and_then(|v| v.as_str())
            .or(claimed_name)
            .unwrap_or(&user_id)
            .to_string();

        info!("JWT token validated successfully for user: {}", user_id);
        let identity = Identity { user_id, username };
        if let Some(exp) = token_data.claims.get("exp").and_then(|v| v.as_i64()) {
            let cached = CachedIdentity {
                identity: identity.clone(),
                valid_until: exp + JWT_LEEWAY_SECS as i64,
            };
            self.verified.insert(token.to_string(), cached);
        }
        Ok(identity)
    }

    pub fn cached_identities(&self) -> u64 {
        self.verified.run_pending_tasks();
        self.verified.entry_count()
    }
}

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header".to_string())?;
        Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string())
    }
    // 2. Try to get token from cookies
    else {
        let cookie_header = req
            .headers()
            .get(http::header::COOKIE)
            .ok_or_else(|| "Missing Authorization header or Cookie".to_string())?
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;

        for c in cookie::Cookie::split_parse(cookie_header).flatten() {
            if c.name() == "auth_token" {
                return Ok(c.value().to_string());
            }
        }
        Err("auth_token cookie not found".to_string())
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = JWT_LEEWAY_SECS;
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    pub const SECRET: &str = "test-secret";

    pub fn signed_token(sub: &str, name: Option<&str>) -> String {
        signed_token_expiring_at(sub, name, chrono::Utc::now().timestamp() + 3600)
    }

    fn signed_token_expiring_at(sub: &str, name: Option<&str>, exp: i64) -> String {
        let mut claims = json!({"sub": sub, "exp": exp});
        if let Some(name) = name {
            claims["name"] = json!(name);
        }
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn authenticator() -> Authenticator {
        Authenticator::new(Some(SECRET.to_string()), Some("dev-token".to_string()))
    }

    #[test]
    fn dev_token_trusts_claims() {
        let identity = authenticator().verify("dev-token", Some("u42"), Some("Ada")).unwrap();
        assert_eq!(identity, Identity { user_id: "u42".into(), username: "Ada".into() });

        let defaulted = authenticator().verify("dev-token", None, None).unwrap();
        assert_eq!(defaulted.user_id, DEV_USER_ID);
        assert_eq!(defaulted.username, DEV_USERNAME);
    }

    #[test]
    fn signed_token_wins_over_claims() {
        let auth = authenticator();
        let token = signed_token("u7", Some("Grace"));
        let identity = auth.verify(&token, Some("someone-else"), Some("Mallory")).unwrap();
        assert_eq!(identity, Identity { user_id: "u7".into(), username: "Grace".into() });

        // Name falls back to the claimed one when the token has none
        let token = signed_token("u8", None);
        let identity = auth.verify(&token, None, Some("Linus")).unwrap();
        assert_eq!(identity.username, "Linus");
    }

    #[test]
    fn bad_tokens_are_rejected() {
        let auth = authenticator();
        assert!(matches!(auth.verify("", None, None), Err(AuthError::MissingToken)));
        assert!(matches!(auth.verify("garbage", None, None), Err(AuthError::InvalidToken(_))));

        let other_secret = Authenticator::new(Some("another".to_string()), None);
        assert!(other_secret.verify(&signed_token("u1", None), None, None).is_err());

        let unconfigured = Authenticator::new(None, None);
        assert!(matches!(
            unconfigured.verify(&signed_token("u1", None), None, None),
            Err(AuthError::NotConfigured)
        ));
    }

    #[test]
    fn expired_token_is_not_served_from_cache() {
        let auth = authenticator();
        // Already past exp but still inside the validation leeway
        let exp = chrono::Utc::now().timestamp() - (JWT_LEEWAY_SECS as i64 - 2);
        let token = signed_token_expiring_at("u5", Some("Rosalind"), exp);
        assert_eq!(auth.verify(&token, None, None).unwrap().user_id, "u5");
        assert_eq!(auth.cached_identities(), 1);

        std::thread::sleep(Duration::from_secs(3));
        assert!(validate_jwt(&token, SECRET).is_err());
        assert!(matches!(auth.verify(&token, None, None), Err(AuthError::InvalidToken(_))));
        assert_eq!(auth.cached_identities(), 0);
    }

    #[test]
    fn token_is_read_from_header_or_cookie() {
        let req = http::Request::builder()
            .header(http::header::AUTHORIZATION, "Bearer abc")
            .body(())
            .unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "abc");

        let req = http::Request::builder()
            .header(http::header::COOKIE, "theme=dark; auth_token=xyz")
            .body(())
            .unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "xyz");

        let req = http::Request::builder().body(()).unwrap();
        assert!(get_auth_token(&req).is_err());
    }
}
