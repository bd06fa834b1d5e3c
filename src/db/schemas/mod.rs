//! Database schemas for avtaler
//!
//! One collection for signed agreements, one for pending signing jobs. Both
//! are keyed by organization number.

mod avtale;
mod digipost_jobb;
mod metadata;

pub use avtale::{AvtaleDoc, AVTALE_COLLECTION};
pub use digipost_jobb::{DigipostJobbDoc, DIGIPOST_JOBB_COLLECTION};
pub use metadata::Metadata;
