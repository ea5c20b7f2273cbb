pub mod cache;
pub mod callback;
pub mod credential;
pub mod grants;
pub mod jwt;
pub mod manager;
pub mod pkce;
pub mod store;

pub use credential::{Attachment, Credential, TokenData};
pub use manager::AuthManager;
pub use store::TokenStore;

/// The way a credential was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    ApiKey,
    AuthorizationCode,
    RefreshToken,
    Password,
    JwtBearer,
}

impl std::fmt::Display for AuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthFlow::ApiKey => "api-key",
            AuthFlow::AuthorizationCode => "authorization-code",
            AuthFlow::RefreshToken => "refresh-token",
            AuthFlow::Password => "password",
            AuthFlow::JwtBearer => "jwt-bearer",
        };
        f.write_str(s)
    }
}
