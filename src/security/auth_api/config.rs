use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use log::debug;

use super::error::AuthError;
use super::types::{TokenClaims, VerifiedClaims};
use crate::core::config::AuthSettings;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub audience: Option<String>,
    pub issuer: Option<String>,
    pub bearer_prefix: String,
    pub leeway_seconds: u64,
    /// Paths that may be called without a token. A valid token is still
    /// decoded so handlers can use it when present.
    pub allow_anonymous_paths: Vec<String>,
    /// Paths that need a verified token but no provisioned user row.
    pub provisioning_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            audience: Some("authenticated".to_string()),
            issuer: None,
            bearer_prefix: "Bearer ".to_string(),
            leeway_seconds: 30,
            allow_anonymous_paths: vec![
                "/health".to_string(),
                "/api/health".to_string(),
                "/api/test-data/cleanup".to_string(),
            ],
            provisioning_paths: vec!["/api/auth/bootstrap".to_string()],
        }
    }
}

impl AuthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self {
            jwt_secret: settings.jwt_secret.clone(),
            audience: settings.audience.clone().filter(|a| !a.is_empty()),
            issuer: settings.issuer.clone().filter(|i| !i.is_empty()),
            ..Self::default()
        }
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = secret.into();
        self
    }

    pub fn with_audience(mut self, audience: Option<&str>) -> Self {
        self.audience = audience.map(str::to_string);
        self
    }

    pub fn add_anonymous_path(mut self, path: impl Into<String>) -> Self {
        self.allow_anonymous_paths.push(path.into());
        self
    }

    fn matches(paths: &[String], path: &str) -> bool {
        paths
            .iter()
            .any(|p| path == p || path.starts_with(&format!("{}/", p)))
    }

    pub fn is_anonymous_allowed(&self, path: &str) -> bool {
        Self::matches(&self.allow_anonymous_paths, path)
    }

    pub fn is_provisioning_path(&self, path: &str) -> bool {
        Self::matches(&self.provisioning_paths, path)
    }

    /// Validates an HS256 token issued by the hosted auth provider.
    pub fn decode_token(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        if self.jwt_secret.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_seconds;
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        if let Some(iss) = &self.issuer {
            validation.set_issuer(&[iss]);
        }

        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            other => {
                debug!("Token rejected: {other:?}");
                AuthError::InvalidToken
            }
        })?;

        VerifiedClaims::try_from(data.claims)
    }
}
