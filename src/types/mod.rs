//! Shared types for avtaler

pub mod avtale;
pub mod error;

pub use avtale::{
    Avgiver, Avtale, DigipostJobbData, Kommune, KommuneAvtale, Lookup, KOMMUNE_ORGANISASJONSFORM,
};
pub use error::{AvtaleError, Result};
