//! Configuration for avtaler
//!
//! CLI arguments and environment variable handling using clap. In the
//! cluster everything comes from the environment; flags are for local runs.

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Avtaler - signing of municipal agreements
#[derive(Parser, Debug, Clone)]
#[command(name = "avtaler")]
#[command(about = "Agreement signing backend for municipalities")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (unverified caller tokens, passthrough token broker)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "avtaler")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Outbound request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Accept template uploads on /internal/avtalemal
    #[arg(long, env = "AVTALEMAL_UPLOAD_ENABLED", default_value = "false")]
    pub avtalemal_upload_enabled: bool,

    #[command(flatten)]
    pub tokenx: TokenXArgs,

    #[command(flatten)]
    pub maskinporten: MaskinportenArgs,

    #[command(flatten)]
    pub altinn: AltinnArgs,

    #[command(flatten)]
    pub ereg: EregArgs,

    #[command(flatten)]
    pub pdl: PdlArgs,

    #[command(flatten)]
    pub digipost: DigipostArgs,

    #[command(flatten)]
    pub bucket: BucketArgs,
}

/// TokenX: inbound token validation and on-behalf-of exchange
#[derive(Parser, Debug, Clone)]
pub struct TokenXArgs {
    /// Our client id, also the expected audience of caller tokens
    #[arg(long, env = "TOKEN_X_CLIENT_ID")]
    pub tokenx_client_id: Option<String>,

    #[arg(long, env = "TOKEN_X_ISSUER", default_value = "")]
    pub tokenx_issuer: String,

    #[arg(long, env = "TOKEN_X_JWKS_URI", default_value = "")]
    pub tokenx_jwks_uri: String,

    #[arg(long, env = "TOKEN_X_TOKEN_ENDPOINT", default_value = "")]
    pub tokenx_token_endpoint: String,

    /// PEM file with the RSA key used for client assertions
    #[arg(long, env = "TOKEN_X_PRIVATE_KEY_PATH")]
    pub tokenx_private_key_path: Option<PathBuf>,

    #[arg(long, env = "TOKEN_X_KEY_ID", default_value = "tokenx")]
    pub tokenx_key_id: String,
}

/// Maskinporten: the service's own tokens
#[derive(Parser, Debug, Clone)]
pub struct MaskinportenArgs {
    #[arg(long, env = "MASKINPORTEN_CLIENT_ID")]
    pub maskinporten_client_id: Option<String>,

    #[arg(long, env = "MASKINPORTEN_ISSUER", default_value = "")]
    pub maskinporten_issuer: String,

    #[arg(long, env = "MASKINPORTEN_TOKEN_ENDPOINT", default_value = "")]
    pub maskinporten_token_endpoint: String,

    /// Comma-separated scopes
    #[arg(long, env = "MASKINPORTEN_SCOPES", default_value = "")]
    pub maskinporten_scopes: String,

    #[arg(long, env = "MASKINPORTEN_PRIVATE_KEY_PATH")]
    pub maskinporten_private_key_path: Option<PathBuf>,

    #[arg(long, env = "MASKINPORTEN_KEY_ID", default_value = "maskinporten")]
    pub maskinporten_key_id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct AltinnArgs {
    #[arg(long, env = "ALTINN_URL", default_value = "http://localhost:8090")]
    pub altinn_url: String,

    /// Token exchange audience for the Altinn proxy
    #[arg(long, env = "ALTINN_AUDIENCE", default_value = "altinn")]
    pub altinn_audience: String,

    #[arg(long, env = "ALTINN_API_KEY")]
    pub altinn_api_key: Option<String>,

    /// Service code whose grant is the right to sign
    #[arg(long, env = "ALTINN_SERVICE_CODE", default_value = "5867")]
    pub altinn_service_code: String,

    #[arg(long, env = "ALTINN_SERVICE_EDITION", default_value = "1")]
    pub altinn_service_edition: String,

    #[arg(long, env = "ALTINN_PAGE_SIZE", default_value = "1000")]
    pub altinn_page_size: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct EregArgs {
    #[arg(long, env = "EREG_URL", default_value = "https://data.brreg.no/enhetsregisteret/api")]
    pub ereg_url: String,

    /// Send a Maskinporten token with registry lookups
    #[arg(long, env = "EREG_USE_MASKINPORTEN", default_value = "false")]
    pub ereg_use_maskinporten: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct PdlArgs {
    #[arg(long, env = "PDL_URL", default_value = "http://localhost:8091/graphql")]
    pub pdl_url: String,

    #[arg(long, env = "PDL_AUDIENCE", default_value = "pdl-api")]
    pub pdl_audience: String,

    #[arg(long, env = "PDL_BEHANDLINGSNUMMER")]
    pub pdl_behandlingsnummer: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct DigipostArgs {
    #[arg(long, env = "DIGIPOST_URL", default_value = "https://api.difitest.signering.posten.no/api")]
    pub digipost_url: String,

    /// Sender organization number
    #[arg(long, env = "DIGIPOST_SENDER_ID", default_value = "")]
    pub digipost_sender_id: String,

    /// PEM file with client certificate chain and key for mutual TLS
    #[arg(long, env = "DIGIPOST_CLIENT_IDENTITY_PATH")]
    pub digipost_client_identity_path: Option<PathBuf>,

    #[arg(long, env = "DIGIPOST_COMPLETION_URL", default_value = "http://localhost:3000/avtaler/signert")]
    pub digipost_completion_url: String,

    #[arg(long, env = "DIGIPOST_REJECTION_URL", default_value = "http://localhost:3000/avtaler/avbrutt")]
    pub digipost_rejection_url: String,

    #[arg(long, env = "DIGIPOST_ERROR_URL", default_value = "http://localhost:3000/avtaler/feil")]
    pub digipost_error_url: String,

    #[arg(long, env = "DIGIPOST_DOCUMENT_TITLE", default_value = "Avtale om digital søknad")]
    pub digipost_document_title: String,
}

#[derive(Parser, Debug, Clone)]
pub struct BucketArgs {
    #[arg(long, env = "BUCKET_NAME", default_value = "avtaler")]
    pub bucket_name: String,

    #[arg(long, env = "BUCKET_URL", default_value = "https://storage.googleapis.com")]
    pub bucket_url: String,

    /// Use the GCE metadata server for bucket tokens (off for the emulator)
    #[arg(long, env = "BUCKET_USE_METADATA_SERVER", default_value = "true")]
    pub bucket_use_metadata_server: bool,
}

/// Read a PEM file into memory that is wiped on drop
pub fn read_secret(path: &Path) -> Result<Zeroizing<String>, String> {
    std::fs::read_to_string(path)
        .map(Zeroizing::new)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

impl Args {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn maskinporten_scopes(&self) -> Vec<String> {
        self.maskinporten
            .maskinporten_scopes
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(format!("LOG_FORMAT must be text or json, got '{}'", self.log_format));
        }

        if self.dev_mode {
            return Ok(());
        }

        let tokenx = &self.tokenx;
        if tokenx.tokenx_client_id.is_none() || tokenx.tokenx_private_key_path.is_none() {
            return Err(
                "TOKEN_X_CLIENT_ID and TOKEN_X_PRIVATE_KEY_PATH are required in production mode"
                    .to_string(),
            );
        }
        if tokenx.tokenx_issuer.is_empty()
            || tokenx.tokenx_jwks_uri.is_empty()
            || tokenx.tokenx_token_endpoint.is_empty()
        {
            return Err(
                "TOKEN_X_ISSUER, TOKEN_X_JWKS_URI and TOKEN_X_TOKEN_ENDPOINT are required in production mode"
                    .to_string(),
            );
        }

        if self.ereg.ereg_use_maskinporten {
            let mp = &self.maskinporten;
            if mp.maskinporten_client_id.is_none()
                || mp.maskinporten_private_key_path.is_none()
                || mp.maskinporten_issuer.is_empty()
                || mp.maskinporten_token_endpoint.is_empty()
            {
                return Err(
                    "EREG_USE_MASKINPORTEN requires the MASKINPORTEN_* settings".to_string(),
                );
            }
        }

        if self.digipost.digipost_sender_id.is_empty() {
            return Err("DIGIPOST_SENDER_ID is required in production mode".to_string());
        }

        Ok(())
    }
}
