use serde::{Deserialize, Serialize};

use super::consent::EnedisConsent;
use super::domain::{ConsentId, Document, DossierId, Order, OrderId};
use super::dossier::Dossier;

/// An order together with the dossiers it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order: Order,
    pub dossiers: Vec<Dossier>,
}

impl OrderRecord {
    pub fn dossier(&self, dossier_id: &DossierId) -> Option<&Dossier> {
        self.dossiers
            .iter()
            .find(|dossier| &dossier.dossier_id == dossier_id)
    }
}

/// Storage abstraction so the tracking service can be exercised in
/// isolation. Dossier writes are compare-and-swap on the version the
/// caller last observed; stale writes are refused, never merged.
pub trait TrackingStore: Send + Sync {
    fn insert_order(&self, record: OrderRecord) -> Result<OrderRecord, RepositoryError>;
    fn fetch_order(&self, order_id: &OrderId) -> Result<Option<OrderRecord>, RepositoryError>;
    fn update_order(&self, order: Order) -> Result<(), RepositoryError>;

    /// Replace a dossier only if the stored version still equals
    /// `expected_version`.
    fn update_dossier(&self, dossier: Dossier, expected_version: u64)
        -> Result<(), RepositoryError>;

    /// Documents append without a version check; they are immutable and
    /// concurrent appends commute.
    fn append_document(&self, document: Document) -> Result<(), RepositoryError>;

    fn upsert_consent(&self, consent: EnedisConsent) -> Result<(), RepositoryError>;
    fn fetch_consent(&self, consent_id: &ConsentId)
        -> Result<Option<EnedisConsent>, RepositoryError>;
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stale write: expected version {expected}, stored version is {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
