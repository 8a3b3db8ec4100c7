pub mod auth;
pub mod config;
pub mod error;
pub mod identity;
pub mod resolver;

pub use auth::BearerToken;
pub use identity::{Identity, RequestContext};
pub use resolver::{CredentialResolver, ResolveError};
