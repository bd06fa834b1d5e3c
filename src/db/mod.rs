//! Persistence for agreements and pending signing jobs

pub mod mongo;
pub mod schemas;
pub mod store;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, UpsertFields};
pub use store::{AgreementStore, InMemoryAgreementStore, MongoAgreementStore};
