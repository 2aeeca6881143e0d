//! Bearer token claims, roles, signing/verification and the request
//! middleware that enforces them.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ApiError;
use crate::types::CustomerId;

/// Roles carried in the `roles` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Seller,
    Customer,
    /// Service-to-service calls (sales calling inventory).
    Service,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Seller => "Seller",
            Role::Customer => "Customer",
            Role::Service => "Service",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Signing(detail) => ApiError::Internal(detail),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub name: String,
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|r| r == role.as_str())
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(*r))
    }

    /// Admin or Seller.
    pub fn is_elevated(&self) -> bool {
        self.has_any_role(&[Role::Admin, Role::Seller])
    }

    pub fn customer_id(&self) -> CustomerId {
        CustomerId::new(self.sub.clone())
    }

    /// Owners and elevated callers may read or cancel an order.
    pub fn can_access(&self, customer_id: &CustomerId) -> bool {
        self.is_elevated() || self.sub == customer_id.as_str()
    }

    pub fn require_any(&self, roles: &[Role]) -> Result<(), ApiError> {
        if self.has_any_role(roles) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "Requires one of the roles: {}",
                roles
                    .iter()
                    .map(Role::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }
}

/// Signing configuration.
///
/// Reads from environment variables:
/// - `JWT_SECRET` (default: development secret)
/// - `JWT_ISSUER` (default: `"storefront-identity"`)
/// - `JWT_TTL_SECS` (default: `3600`)
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl_secs: i64,
}

impl JwtConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            secret: std::env::var("JWT_SECRET").unwrap_or(defaults.secret),
            issuer: std::env::var("JWT_ISSUER").unwrap_or(defaults.issuer),
            ttl_secs: std::env::var("JWT_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ttl_secs),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "storefront-dev-secret-change-in-production".to_string(),
            issuer: "storefront-identity".to_string(),
            ttl_secs: 3600,
        }
    }
}

/// Issues and verifies HS256 tokens.
#[derive(Clone)]
pub struct JwtManager {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn issue(&self, subject: &str, name: &str, roles: &[Role]) -> Result<String, AuthError> {
        self.issue_with_ttl(subject, name, roles, self.config.ttl_secs)
    }

    pub fn issue_with_ttl(
        &self,
        subject: &str,
        name: &str,
        roles: &[Role],
        ttl_secs: i64,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            name: name.to_string(),
            roles: roles.iter().map(|r| r.as_str().to_string()).collect(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
            iss: self.config.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Checks signature, expiry and issuer. Claims are trusted verbatim.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })
    }
}

/// Rejects requests without a valid bearer token and stores the verified
/// [`Claims`] in the request extensions.
pub async fn require_auth(
    State(jwt): State<Arc<JwtManager>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return ApiError::from(AuthError::MissingToken).into_response();
    };

    match jwt.verify(token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "rejected bearer token");
            ApiError::from(e).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceExt;

    fn manager() -> JwtManager {
        JwtManager::new(JwtConfig::default())
    }

    #[test]
    fn issue_and_verify() {
        let jwt = manager();
        let token = jwt.issue("42", "Ana", &[Role::Customer]).unwrap();
        let claims = jwt.verify(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.name, "Ana");
        assert!(claims.has_role(Role::Customer));
        assert!(!claims.is_elevated());
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = manager();
        let token = jwt
            .issue_with_ttl("42", "Ana", &[Role::Customer], -3600)
            .unwrap();
        assert!(matches!(jwt.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let other = JwtManager::new(JwtConfig {
            secret: "another-secret".into(),
            ..JwtConfig::default()
        });
        let token = other.issue("42", "Ana", &[Role::Admin]).unwrap();
        assert!(matches!(manager().verify(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let other = JwtManager::new(JwtConfig {
            issuer: "someone-else".into(),
            ..JwtConfig::default()
        });
        let token = other.issue("42", "Ana", &[Role::Admin]).unwrap();
        assert!(manager().verify(&token).is_err());
    }

    #[test]
    fn access_rules() {
        let jwt = manager();
        let customer = jwt
            .verify(&jwt.issue("c-1", "Ana", &[Role::Customer]).unwrap())
            .unwrap();
        let seller = jwt
            .verify(&jwt.issue("s-1", "Bob", &[Role::Seller]).unwrap())
            .unwrap();

        assert!(customer.can_access(&CustomerId::from("c-1")));
        assert!(!customer.can_access(&CustomerId::from("c-2")));
        assert!(seller.can_access(&CustomerId::from("c-2")));
        assert!(customer.require_any(&[Role::Admin]).is_err());
        assert!(seller.require_any(&[Role::Admin, Role::Seller]).is_ok());
    }

    fn protected_app(jwt: Arc<JwtManager>) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|axum::Extension(claims): axum::Extension<Claims>| async move { claims.sub }),
            )
            .layer(axum::middleware::from_fn_with_state(jwt, require_auth))
    }

    #[tokio::test]
    async fn middleware_requires_bearer_token() {
        let app = protected_app(Arc::new(manager()));
        let response = app
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn middleware_injects_claims() {
        let jwt = Arc::new(manager());
        let token = jwt.issue("u-9", "Eve", &[Role::Customer]).unwrap();
        let app = protected_app(jwt);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("Authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"u-9");
    }
}
