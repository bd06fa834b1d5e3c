//! Authentication for avtaler
//!
//! Outbound: the token broker signs client assertions and obtains TokenX
//! and Maskinporten tokens. Inbound: caller tokens are validated against the
//! identity provider's JWKS.

pub mod assertion;
pub mod broker;
pub mod endpoint;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_keys;

pub use assertion::ClientAssertionSigner;
pub use broker::{
    AccessToken, ClientCredentialsFlow, OAuthTokenBroker, PassthroughTokenBroker, TokenBroker,
    TokenExchangeFlow, TokenPurpose, EXPIRY_MARGIN_SECS,
};
pub use endpoint::{HttpTokenEndpoint, TokenEndpoint, TokenError, TokenResponse};
pub use validator::{CallerTokenValidator, Innlogget, ValidatorConfig};
