//! Avtaler - signing of municipal agreements
//!
//! Lets an authorized municipal employee sign the agreement between the
//! municipality and the service through Digipost, and keeps the signed
//! result in MongoDB and a storage bucket.
//!
//! ## Modules
//!
//! - **auth**: token broker for outbound calls, caller token validation
//! - **services**: Altinn, Enhetsregisteret, Digipost, PDL, bucket, and the
//!   agreement lifecycle on top of them
//! - **db**: agreement and pending job persistence
//! - **routes** / **server**: the HTTP API
//! - **logging**: the access audit trail

pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod retry;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{AvtaleError, Result};
