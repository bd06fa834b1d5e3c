//! Avtaler - signing of municipal agreements

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avtaler::{
    auth::{
        CallerTokenValidator, ClientAssertionSigner, ClientCredentialsFlow, HttpTokenEndpoint,
        OAuthTokenBroker, PassthroughTokenBroker, TokenBroker, TokenExchangeFlow, ValidatorConfig,
    },
    config::{read_secret, Args},
    db::{AgreementStore, InMemoryAgreementStore, MongoAgreementStore, MongoClient},
    server::{self, AppState},
    services::{
        AltinnClient, AltinnConfig, AltinnTjeneste, AvtaleService, AvtaleServiceConfig,
        AvtaleServiceDeps, BucketConfig, BucketDocumentSource, DigipostClient, DigipostConfig,
        EregClient, EregConfig, GcsBucketClient, PdlClient, PdlConfig, StorageAuth,
        DEFAULT_METADATA_TOKEN_URL,
    },
};

fn build_broker(args: &Args, http: &reqwest::Client) -> anyhow::Result<Arc<dyn TokenBroker>> {
    let tokenx = &args.tokenx;
    let exchange = match (&tokenx.tokenx_client_id, &tokenx.tokenx_private_key_path) {
        (Some(client_id), Some(path)) => {
            let key = read_secret(path).map_err(anyhow::Error::msg)?;
            Some(TokenExchangeFlow {
                signer: ClientAssertionSigner::from_rsa_pem(client_id, &tokenx.tokenx_key_id, &key)?,
                endpoint: Arc::new(HttpTokenEndpoint::new(
                    http.clone(),
                    &tokenx.tokenx_token_endpoint,
                )),
            })
        }
        _ => None,
    };

    let mp = &args.maskinporten;
    let client_credentials = match (&mp.maskinporten_client_id, &mp.maskinporten_private_key_path) {
        (Some(client_id), Some(path)) => {
            let key = read_secret(path).map_err(anyhow::Error::msg)?;
            Some(ClientCredentialsFlow {
                signer: ClientAssertionSigner::from_rsa_pem(client_id, &mp.maskinporten_key_id, &key)?,
                endpoint: Arc::new(HttpTokenEndpoint::new(
                    http.clone(),
                    &mp.maskinporten_token_endpoint,
                )),
                issuer: mp.maskinporten_issuer.clone(),
                scopes: args.maskinporten_scopes(),
            })
        }
        _ => None,
    };

    if exchange.is_none() && client_credentials.is_none() && args.dev_mode {
        warn!("No token broker keys configured, passing caller tokens through");
        return Ok(Arc::new(PassthroughTokenBroker::new("dev-service-token")));
    }

    Ok(Arc::new(OAuthTokenBroker::new(exchange, client_credentials)))
}

async fn build_store(args: &Args) -> Arc<dyn AgreementStore> {
    let connected = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => MongoAgreementStore::new(client).await,
        Err(e) => Err(e),
    };

    match connected {
        Ok(store) => Arc::new(store),
        Err(e) if args.dev_mode => {
            warn!("MongoDB unavailable (dev mode, keeping agreements in memory): {}", e);
            Arc::new(InMemoryAgreementStore::new())
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("avtaler={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  avtaler {}", env!("CARGO_PKG_VERSION"));
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Altinn: {}", args.altinn.altinn_url);
    info!("Enhetsregisteret: {}", args.ereg.ereg_url);
    info!("Digipost: {}", args.digipost.digipost_url);
    info!("Bucket: {}", args.bucket.bucket_name);
    info!("======================================");

    let http = reqwest::Client::builder()
        .timeout(args.request_timeout())
        .user_agent(concat!("avtaler/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let broker = build_broker(&args, &http)?;

    let validator = Arc::new(CallerTokenValidator::new(
        ValidatorConfig {
            jwks_url: args.tokenx.tokenx_jwks_uri.clone(),
            issuer: args.tokenx.tokenx_issuer.clone(),
            audience: args.tokenx.tokenx_client_id.clone().unwrap_or_default(),
            dev_mode: args.dev_mode,
        },
        http.clone(),
    ));

    let bucket = Arc::new(GcsBucketClient::new(
        BucketConfig {
            base_url: args.bucket.bucket_url.clone(),
            bucket: args.bucket.bucket_name.clone(),
            auth: if args.bucket.bucket_use_metadata_server {
                StorageAuth::MetadataServer {
                    token_url: DEFAULT_METADATA_TOKEN_URL.to_string(),
                }
            } else {
                StorageAuth::None
            },
        },
        http.clone(),
    ));

    let mut ereg_config = EregConfig::new(&args.ereg.ereg_url);
    ereg_config.use_maskinporten = args.ereg.ereg_use_maskinporten;

    let client_identity_pem = match &args.digipost.digipost_client_identity_path {
        Some(path) => Some(read_secret(path).map_err(anyhow::Error::msg)?.as_bytes().to_vec()),
        None => None,
    };
    let digipost = DigipostClient::new(DigipostConfig {
        base_url: args.digipost.digipost_url.clone(),
        sender_id: args.digipost.digipost_sender_id.clone(),
        client_identity_pem,
        request_timeout: args.request_timeout(),
    })?;

    let deps = AvtaleServiceDeps {
        entitlements: Arc::new(AltinnClient::new(
            AltinnConfig {
                base_url: args.altinn.altinn_url.clone(),
                audience: args.altinn.altinn_audience.clone(),
                api_key: args.altinn.altinn_api_key.clone(),
                signing_service: AltinnTjeneste::new(
                    &args.altinn.altinn_service_code,
                    &args.altinn.altinn_service_edition,
                ),
                page_size: args.altinn.altinn_page_size,
            },
            http.clone(),
            Arc::clone(&broker),
        )),
        registry: Arc::new(EregClient::new(ereg_config, http.clone(), Some(Arc::clone(&broker)))),
        signing: Arc::new(digipost),
        persons: Arc::new(PdlClient::new(
            PdlConfig {
                url: args.pdl.pdl_url.clone(),
                audience: args.pdl.pdl_audience.clone(),
                behandlingsnummer: args.pdl.pdl_behandlingsnummer.clone(),
            },
            http.clone(),
            Arc::clone(&broker),
        )),
        documents: Arc::new(BucketDocumentSource::new(bucket.clone())),
        archive: bucket,
        store: build_store(&args).await,
    };

    let service = Arc::new(AvtaleService::new(
        deps,
        AvtaleServiceConfig {
            completion_url: args.digipost.digipost_completion_url.clone(),
            rejection_url: args.digipost.digipost_rejection_url.clone(),
            error_url: args.digipost.digipost_error_url.clone(),
            document_title: args.digipost.digipost_document_title.clone(),
        },
    ));

    let state = Arc::new(
        AppState::new(service, validator)
            .with_upload_enabled(args.avtalemal_upload_enabled)
            .with_dev_mode(args.dev_mode),
    );

    server::run(state, args.listen).await?;

    Ok(())
}
