//! Bearer-token authentication against the hosted auth provider, plus the
//! role guards used by every resource handler.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
#[cfg(test)]
mod tests;
pub mod types;
pub mod utils;

pub use config::AuthConfig;
pub use error::AuthError;
pub use handlers::configure_auth_routes;
pub use middleware::{auth_middleware, require_admin, require_lead, require_role, require_staff};
pub use types::{AuthenticatedUser, TokenClaims, VerifiedClaims};
pub use utils::{extract_bearer_token, is_jwt_format};
