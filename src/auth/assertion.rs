//! Signed JWT assertions for outbound token requests.
//!
//! Both identity providers authenticate this service with a short-lived
//! RS256 JWT signed by a pre-provisioned private key:
//! - TokenX: `client_assertion` on the token-exchange grant
//! - Maskinporten: `assertion` on the JWT-bearer grant

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

use super::endpoint::TokenError;

/// Upper bound on assertion lifetime accepted by the identity providers
pub const MAX_ASSERTION_LIFETIME_SECS: i64 = 120;

/// Claims carried by an assertion
#[derive(Debug, Serialize)]
pub struct AssertionClaims {
    pub iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub aud: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Signs assertions for one registered client
pub struct ClientAssertionSigner {
    client_id: String,
    key_id: String,
    key: EncodingKey,
    lifetime_secs: i64,
}

impl std::fmt::Debug for ClientAssertionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAssertionSigner")
            .field("client_id", &self.client_id)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl ClientAssertionSigner {
    /// Create a signer from a PEM-encoded RSA private key (PKCS#1 or PKCS#8)
    pub fn from_rsa_pem(
        client_id: impl Into<String>,
        key_id: impl Into<String>,
        private_key_pem: &str,
    ) -> Result<Self, TokenError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| TokenError::Signing(format!("bad private key: {e}")))?;

        Ok(Self {
            client_id: client_id.into(),
            key_id: key_id.into(),
            key,
            lifetime_secs: MAX_ASSERTION_LIFETIME_SECS,
        })
    }

    /// Shorten the assertion lifetime (values above 120 seconds are capped)
    pub fn with_lifetime_secs(mut self, secs: i64) -> Self {
        self.lifetime_secs = secs.clamp(1, MAX_ASSERTION_LIFETIME_SECS);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Client assertion for TokenX: `iss` and `sub` are the client id,
    /// `aud` is the token endpoint.
    pub fn client_assertion(&self, token_endpoint: &str) -> Result<String, TokenError> {
        let claims = self.claims(token_endpoint, Some(self.client_id.clone()), None);
        self.sign(&claims)
    }

    /// JWT grant for Maskinporten: `aud` is the issuer, scopes are space separated.
    pub fn jwt_grant(&self, issuer: &str, scopes: &[String]) -> Result<String, TokenError> {
        let claims = self.claims(issuer, None, Some(scopes.join(" ")));
        self.sign(&claims)
    }

    fn claims(&self, audience: &str, sub: Option<String>, scope: Option<String>) -> AssertionClaims {
        let now = Utc::now().timestamp();
        AssertionClaims {
            iss: self.client_id.clone(),
            sub,
            aud: audience.to_string(),
            scope,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp: now + self.lifetime_secs,
        }
    }

    fn sign(&self, claims: &AssertionClaims) -> Result<String, TokenError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());

        jsonwebtoken::encode(&header, claims, &self.key)
            .map_err(|e| TokenError::Signing(format!("JWT encode: {e}")))
    }
}
