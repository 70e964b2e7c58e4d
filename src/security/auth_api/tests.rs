use super::*;
use crate::core::shared::enums::UserRole;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use uuid::Uuid;

const SECRET: &str = "test-secret";

fn token(claims: serde_json::Value, secret: &str) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

fn config() -> AuthConfig {
    AuthConfig::new().with_jwt_secret(SECRET)
}

fn exp_in(secs: i64) -> i64 {
    chrono::Utc::now().timestamp() + secs
}

#[test]
fn test_decode_valid_token() {
    let id = Uuid::new_v4();
    let jwt = token(
        json!({
            "sub": id.to_string(),
            "exp": exp_in(3600),
            "aud": "authenticated",
            "email": "Ada@Example.com",
            "user_metadata": {"full_name": "Ada Lovelace"}
        }),
        SECRET,
    );

    let claims = config().decode_token(&jwt).unwrap();
    assert_eq!(claims.user_id, id);
    assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
    assert_eq!(claims.name.as_deref(), Some("Ada Lovelace"));
}

#[test]
fn test_expired_token() {
    let jwt = token(
        json!({"sub": Uuid::new_v4().to_string(), "exp": exp_in(-3600), "aud": "authenticated"}),
        SECRET,
    );
    assert_eq!(config().decode_token(&jwt), Err(AuthError::ExpiredToken));
}

#[test]
fn test_wrong_secret_and_audience() {
    let claims = json!({"sub": Uuid::new_v4().to_string(), "exp": exp_in(60), "aud": "authenticated"});
    let jwt = token(claims, "other-secret");
    assert_eq!(config().decode_token(&jwt), Err(AuthError::InvalidToken));

    let jwt = token(
        json!({"sub": Uuid::new_v4().to_string(), "exp": exp_in(60), "aud": "service_role"}),
        SECRET,
    );
    assert_eq!(config().decode_token(&jwt), Err(AuthError::InvalidToken));

    let relaxed = config().with_audience(None);
    assert!(relaxed.decode_token(&jwt).is_ok());
}

#[test]
fn test_subject_must_be_uuid() {
    let jwt = token(
        json!({"sub": "not-a-uuid", "exp": exp_in(60), "aud": "authenticated"}),
        SECRET,
    );
    assert_eq!(config().decode_token(&jwt), Err(AuthError::InvalidToken));
}

#[test]
fn test_extract_bearer_token() {
    let mut headers = HeaderMap::new();
    assert_eq!(extract_bearer_token(&headers, "Bearer "), None);

    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer a.b.c"));
    assert_eq!(extract_bearer_token(&headers, "Bearer "), Some("a.b.c"));

    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer x.y.z"));
    assert_eq!(extract_bearer_token(&headers, "Bearer "), Some("x.y.z"));

    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
    assert_eq!(extract_bearer_token(&headers, "Bearer "), None);

    assert!(is_jwt_format("a.b.c"));
    assert!(!is_jwt_format("a..c"));
}

#[test]
fn test_path_classification() {
    let config = config();
    assert!(config.is_anonymous_allowed("/health"));
    assert!(config.is_anonymous_allowed("/api/test-data/cleanup"));
    assert!(!config.is_anonymous_allowed("/healthz"));
    assert!(!config.is_anonymous_allowed("/rpc/ticket.list"));
    assert!(config.is_provisioning_path("/api/auth/bootstrap"));
}

#[test]
fn test_role_guards() {
    let customer = AuthenticatedUser::new(Uuid::new_v4(), "c@example.test", UserRole::Customer);
    let agent = AuthenticatedUser::new(Uuid::new_v4(), "a@example.test", UserRole::Agent);
    let manager = AuthenticatedUser::new(Uuid::new_v4(), "m@example.test", UserRole::Manager);
    let admin = AuthenticatedUser::new(Uuid::new_v4(), "x@example.test", UserRole::Admin);

    assert!(require_staff(&customer).is_err());
    assert!(require_staff(&agent).is_ok());
    assert!(require_lead(&agent).is_err());
    assert!(require_lead(&manager).is_ok());
    assert!(require_admin(&manager).is_err());
    assert!(require_admin(&admin).is_ok());

    let err = require_staff(&customer).unwrap_err();
    assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(err.error_code(), "forbidden");
}

#[test]
fn test_auth_error_codes() {
    assert_eq!(AuthError::MissingToken.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(AuthError::UserNotProvisioned.error_code(), "user_not_provisioned");
    assert_eq!(AuthError::InsufficientRole.status_code(), StatusCode::FORBIDDEN);
}
