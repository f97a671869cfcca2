//! Authentication module

pub mod jwt;
pub mod middleware;

pub use jwt::{JwtService, SessionClaims};
pub use middleware::{extract_token, session_auth_middleware, AuthContext};
