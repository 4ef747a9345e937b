//! Credential checks and bearer tokens.
//!
//! [`AuthHandler`] is the strategy the API layer depends on; the only
//! scheme shipped is [`PasswordJwtAuth`] (argon2 hashes + HMAC signed JWTs),
//! selected by [`from_settings`].

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{AuthScheme, AuthSettings};
use crate::core::errors::{ApiError, AuthError, StoreError};
use crate::core::helpers;
use crate::models::User;
use crate::schemas::{LoginRequest, TokenOut};
use crate::store::DatabaseHandler;
use crate::AppState;

/// JWT claims carried by access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
}

#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Hash a plaintext password for storage.
    async fn hash_password(&self, plaintext: &str) -> Result<String, AuthError>;

    /// Look the user up by name and check the password. Unknown,
    /// tombstoned and wrong-password cases all fail with
    /// [`AuthError::Authentication`].
    async fn verify_credentials(&self, username: &str, password: &str) -> Result<User, AuthError>;

    fn issue_token(&self, user: &User) -> Result<IssuedToken, AuthError>;

    /// Returns the user id embedded in a valid token.
    fn validate_token(&self, token: &str) -> Result<Uuid, AuthError>;
}

pub struct PasswordJwtAuth {
    store: Arc<dyn DatabaseHandler>,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl PasswordJwtAuth {
    pub fn new(store: Arc<dyn DatabaseHandler>, settings: &AuthSettings) -> Result<Self, AuthError> {
        let algorithm = Algorithm::from_str(&settings.algorithm.to_uppercase()).map_err(|_| {
            AuthError::Configuration(format!("unknown algorithm {}", settings.algorithm))
        })?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::Configuration(format!(
                "{:?} needs a key pair, only HMAC algorithms are supported",
                algorithm
            )));
        }
        if settings.secret.is_empty() {
            return Err(AuthError::Configuration("token secret is empty".to_string()));
        }
        if settings.token_expiry_minutes <= 0 {
            return Err(AuthError::Configuration(
                "token expiry must be positive".to_string(),
            ));
        }

        Ok(Self {
            store,
            algorithm,
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            ttl: Duration::minutes(settings.token_expiry_minutes),
        })
    }

    pub fn issue_token_at(&self, user: &User, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        let claims = Claims {
            sub: user.id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            expires_in: self.ttl.num_seconds(),
        })
    }

    /// Signature and shape are checked before expiry: a forged token is
    /// invalid even when it is also stale.
    pub fn validate_token_at(&self, token: &str, now: DateTime<Utc>) -> Result<Uuid, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            log::debug!("Rejected token: {}", e);
            AuthError::TokenInvalid
        })?;

        if now.timestamp() >= data.claims.exp {
            return Err(AuthError::TokenExpired);
        }

        Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::TokenInvalid)
    }
}

#[async_trait]
impl AuthHandler for PasswordJwtAuth {
    async fn hash_password(&self, plaintext: &str) -> Result<String, AuthError> {
        let plaintext = plaintext.to_string();
        tokio::task::spawn_blocking(move || helpers::hash_password(&plaintext))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    async fn verify_credentials(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let user = match self.store.get_user_by_username(username).await {
            Ok(user) => user,
            Err(StoreError::NotFound { .. }) => return Err(AuthError::Authentication),
            Err(e) => return Err(e.into()),
        };

        let password = password.to_string();
        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || helpers::verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?;

        if matches {
            Ok(user)
        } else {
            Err(AuthError::Authentication)
        }
    }

    fn issue_token(&self, user: &User) -> Result<IssuedToken, AuthError> {
        self.issue_token_at(user, Utc::now())
    }

    fn validate_token(&self, token: &str) -> Result<Uuid, AuthError> {
        self.validate_token_at(token, Utc::now())
    }
}

/// Builds the auth strategy named by `settings.scheme`.
pub fn from_settings(
    settings: &AuthSettings,
    store: Arc<dyn DatabaseHandler>,
) -> Result<Arc<dyn AuthHandler>, AuthError> {
    match settings.scheme {
        AuthScheme::Jwt => Ok(Arc::new(PasswordJwtAuth::new(store, settings)?)),
    }
}

/// The caller of a protected route, resolved from `Authorization: Bearer`.
/// Tokens of accounts deleted after issue are rejected as invalid.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        Box::pin(async move {
            let state = state.ok_or_else(|| {
                ApiError::InternalError("application state not configured".to_string())
            })?;
            let token = header
                .as_deref()
                .and_then(bearer_token)
                .ok_or(AuthError::MissingToken)?;

            let id = state.auth.validate_token(token)?;
            match state.store.get_user(id).await {
                Ok(_) => Ok(AuthUser { id }),
                Err(StoreError::NotFound { .. }) => Err(AuthError::TokenInvalid.into()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

// === HTTP Handlers ===

pub async fn login_user(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let creds = body.into_inner().validate()?;

    let user = match state.auth.verify_credentials(&creds.username, &creds.password).await {
        Ok(user) => user,
        Err(e) => {
            log::debug!("Login failed for {}: {}", creds.username, e);
            return Err(e.into());
        }
    };

    let issued = state.auth.issue_token(&user)?;
    log::info!("User {} logged in", user.id);

    Ok(HttpResponse::Ok().json(TokenOut::bearer(issued.token, issued.expires_in)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::store::MemoryStore;

    fn settings() -> AuthSettings {
        AuthSettings {
            secret: "test_secret_key_for_testing_only".to_string(),
            token_expiry_minutes: 15,
            ..Default::default()
        }
    }

    fn auth() -> PasswordJwtAuth {
        PasswordJwtAuth::new(Arc::new(MemoryStore::new()), &settings()).unwrap()
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "tester".to_string(),
            email: "tester@example.com".to_string(),
            password_hash: String::new(),
            display_name: None,
            bio: None,
            avatar: None,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn token_round_trip_returns_user_id() {
        let auth = auth();
        let user = user();
        let issued = auth.issue_token(&user).unwrap();

        assert_eq!(issued.expires_in, 15 * 60);
        assert_eq!(auth.validate_token(&issued.token).unwrap(), user.id);
    }

    #[test]
    fn token_expires_exactly_after_its_lifetime() {
        let auth = auth();
        let user = user();
        let issued_at = Utc::now();
        let ttl = Duration::minutes(15);
        let token = auth.issue_token_at(&user, issued_at).unwrap().token;

        let just_before = issued_at + ttl - Duration::seconds(1);
        let just_after = issued_at + ttl + Duration::seconds(1);

        assert_eq!(auth.validate_token_at(&token, just_before).unwrap(), user.id);
        assert!(matches!(
            auth.validate_token_at(&token, just_after),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn tampered_token_is_invalid_not_expired() {
        let auth = auth();
        let issued_at = Utc::now() - Duration::days(2);
        let token = auth.issue_token_at(&user(), issued_at).unwrap().token;

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[2] = parts[2].chars().rev().collect();
        let tampered = parts.join(".");

        assert!(matches!(auth.validate_token(&tampered), Err(AuthError::TokenInvalid)));
        assert!(matches!(auth.validate_token(&token), Err(AuthError::TokenExpired)));
        assert!(matches!(auth.validate_token("not.a.jwt"), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn token_signed_with_another_secret_is_invalid() {
        let other = PasswordJwtAuth::new(
            Arc::new(MemoryStore::new()),
            &AuthSettings {
                secret: "some other secret".to_string(),
                ..settings()
            },
        )
        .unwrap();
        let token = other.issue_token(&user()).unwrap().token;

        assert!(matches!(auth().validate_token(&token), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn algorithm_is_configurable_and_enforced() {
        let hs512 = PasswordJwtAuth::new(
            Arc::new(MemoryStore::new()),
            &AuthSettings {
                algorithm: "hs512".to_string(),
                ..settings()
            },
        )
        .unwrap();
        let user = user();
        let token = hs512.issue_token(&user).unwrap().token;

        assert_eq!(hs512.validate_token(&token).unwrap(), user.id);
        // same secret, different algorithm
        assert!(matches!(auth().validate_token(&token), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn rejects_unusable_configuration() {
        let store: Arc<dyn DatabaseHandler> = Arc::new(MemoryStore::new());
        for bad in [
            AuthSettings { algorithm: "RS256".to_string(), ..settings() },
            AuthSettings { algorithm: "none".to_string(), ..settings() },
            AuthSettings { secret: String::new(), ..settings() },
            AuthSettings { token_expiry_minutes: 0, ..settings() },
        ] {
            assert!(matches!(
                PasswordJwtAuth::new(store.clone(), &bad),
                Err(AuthError::Configuration(_))
            ));
        }
    }

    #[tokio::test]
    async fn verify_credentials_checks_the_stored_hash() {
        let store: Arc<dyn DatabaseHandler> = Arc::new(MemoryStore::new());
        let auth = PasswordJwtAuth::new(store.clone(), &settings()).unwrap();

        let hash = auth.hash_password("s3cret-pass").await.unwrap();
        assert_ne!(hash, "s3cret-pass");
        let created = store
            .create_user(NewUser {
                username: "carol".to_string(),
                email: "carol@example.com".to_string(),
                password_hash: hash,
                display_name: None,
            })
            .await
            .unwrap();

        let user = auth.verify_credentials("carol", "s3cret-pass").await.unwrap();
        assert_eq!(user.id, created.id);
        assert!(matches!(
            auth.verify_credentials("carol", "wrong-pass").await,
            Err(AuthError::Authentication)
        ));
        assert!(matches!(
            auth.verify_credentials("nobody", "s3cret-pass").await,
            Err(AuthError::Authentication)
        ));

        store.soft_delete_user(created.id).await.unwrap();
        assert!(matches!(
            auth.verify_credentials("carol", "s3cret-pass").await,
            Err(AuthError::Authentication)
        ));
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
