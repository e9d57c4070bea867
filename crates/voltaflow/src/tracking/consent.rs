//! Enedis consent lifecycle.
//!
//! A consent is a long-running relationship with the utility, layered onto
//! the `admin_enedis` dossier: requested, then activated by the utility,
//! then usable for consumption-data pulls until it is revoked or quietly
//! ages out 12 months after activation. Expiry is a read-time property; no
//! background timer is involved. The manager reports every consent-driven
//! status change back into the owning dossier through the regular
//! transition path, acting as the `system` actor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::domain::{Actor, ConsentId, DossierId, OrderId};
use super::dossier::{DossierStatus, DossierType, EnedisStatus, TransitionGate};
use super::repository::TrackingStore;
use super::service::{TrackingError, TrackingService};
use super::validation::validate_consent_request;

/// Calendar months an activated consent stays usable.
pub const CONSENT_VALIDITY_MONTHS: u32 = 12;

static CONSENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_consent_id() -> ConsentId {
    let id = CONSENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ConsentId(format!("cons-{id:06}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Active,
    Revoked,
    Expired,
}

impl ConsentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

/// Consent aggregate, one per `admin_enedis` dossier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnedisConsent {
    pub consent_id: ConsentId,
    pub order_id: OrderId,
    pub dossier_id: DossierId,
    pub pdl: String,
    pub last_name: String,
    pub address: String,
    pub status: ConsentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl EnedisConsent {
    /// Status as observed at `now`: an active consent older than twelve
    /// months reads as expired even if nothing was ever written back.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ConsentStatus {
        match (self.status, self.consent_date) {
            (ConsentStatus::Active, Some(consent_date)) => {
                let lapsed = consent_date
                    .checked_add_months(Months::new(CONSENT_VALIDITY_MONTHS))
                    .map(|expiry| expiry < now)
                    .unwrap_or(false);
                if lapsed {
                    ConsentStatus::Expired
                } else {
                    ConsentStatus::Active
                }
            }
            (status, _) => status,
        }
    }
}

/// Consent request payload as entered by the administrator or customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequestInput {
    pub pdl: String,
    pub last_name: String,
    pub address: String,
}

/// Activation state reported by the utility when a consent is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Active,
}

/// Response of the utility's consent creation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentReceipt {
    pub consent_id: ConsentId,
    pub status: ReceiptStatus,
    pub created_at: DateTime<Utc>,
}

/// One year of consumption data returned by the utility. Hourly values are
/// in Wh, monthly aggregates in kWh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionPull {
    pub pdl: String,
    pub hourly_values: Vec<u32>,
    pub monthly_values: Vec<u32>,
    pub synced_at: DateTime<Utc>,
}

/// Interval covered by a successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub record_count: usize,
}

/// Error kinds of the utility's consent/data API.
#[derive(Debug, thiserror::Error)]
pub enum ConsentApiError {
    #[error("ENEDIS_CONSENT_INVALID: {0}")]
    ConsentInvalid(String),
    #[error("ENEDIS_API_UNAVAILABLE: {0}")]
    Unavailable(String),
    #[error("ENEDIS_DATA_NOT_FOUND: {0}")]
    DataNotFound(String),
    #[error("ENEDIS_CONSENT_EXPIRED: {0}")]
    ConsentExpired(String),
}

impl From<ConsentApiError> for TrackingError {
    fn from(value: ConsentApiError) -> Self {
        match value {
            ConsentApiError::ConsentInvalid(message) => Self::ConsentInvalid(message),
            ConsentApiError::Unavailable(message) => Self::ExternalUnavailable(message),
            ConsentApiError::DataNotFound(message) => Self::ExternalDataAbsent(message),
            ConsentApiError::ConsentExpired(message) => Self::ConsentExpired(message),
        }
    }
}

/// Boundary to the utility's consent/data API. The only suspending calls
/// in the crate; a failed or cancelled call must leave no partial state.
#[async_trait]
pub trait ConsentGateway: Send + Sync {
    async fn request_consent(
        &self,
        request: &ConsentRequestInput,
    ) -> Result<ConsentReceipt, ConsentApiError>;

    async fn pull_consumption(
        &self,
        consent_id: &ConsentId,
        pdl: &str,
    ) -> Result<ConsumptionPull, ConsentApiError>;
}

/// Drives the external consent lifecycle and mirrors it onto the owning
/// `admin_enedis` dossier.
pub struct ConsentSyncManager<S, G> {
    service: Arc<TrackingService<S>>,
    gateway: Arc<G>,
}

impl<S, G> ConsentSyncManager<S, G>
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    pub fn new(service: Arc<TrackingService<S>>, gateway: Arc<G>) -> Self {
        Self { service, gateway }
    }

    /// Validate and submit a consent request for an `admin_enedis`
    /// dossier, advancing it to `consent_requested` on success. State is
    /// only touched after the gateway call came back successfully.
    pub async fn request_consent(
        &self,
        order_id: &OrderId,
        dossier_id: &DossierId,
        input: ConsentRequestInput,
    ) -> Result<EnedisConsent, TrackingError> {
        let errors = validate_consent_request(&input.pdl, &input.last_name, &input.address);
        if !errors.is_empty() {
            return Err(TrackingError::ValidationFailed(errors));
        }

        let record = self.service.order(order_id)?;
        let dossier = record
            .dossier(dossier_id)
            .ok_or(TrackingError::NotFound("dossier"))?;
        if dossier.dossier_type() != DossierType::AdminEnedis {
            return Err(TrackingError::NotFound("admin_enedis dossier"));
        }
        if dossier.status != DossierStatus::AdminEnedis(EnedisStatus::NotStarted) {
            return Err(TrackingError::InvalidTransition {
                from: dossier.status.label().to_string(),
                to: EnedisStatus::ConsentRequested.label().to_string(),
            });
        }

        let receipt = self.gateway.request_consent(&input).await?;

        let consent_id = if receipt.consent_id.0.is_empty() {
            next_consent_id()
        } else {
            receipt.consent_id.clone()
        };
        let consent = EnedisConsent {
            consent_id: consent_id.clone(),
            order_id: order_id.clone(),
            dossier_id: dossier_id.clone(),
            pdl: input.pdl.clone(),
            last_name: input.last_name.trim().to_string(),
            address: input.address.trim().to_string(),
            status: match receipt.status {
                ReceiptStatus::Pending => ConsentStatus::Pending,
                ReceiptStatus::Active => ConsentStatus::Active,
            },
            consent_date: match receipt.status {
                ReceiptStatus::Pending => None,
                ReceiptStatus::Active => Some(receipt.created_at),
            },
            created_at: receipt.created_at,
            last_sync_at: None,
        };
        self.service.store().upsert_consent(consent.clone())?;

        self.service.transition_dossier(
            order_id,
            dossier_id,
            DossierStatus::AdminEnedis(EnedisStatus::ConsentRequested),
            &Actor::system(),
            None,
            TransitionGate::None,
            Some("consent requested".to_string()),
        )?;
        self.service
            .attach_consent(order_id, dossier_id, consent_id.clone())?;

        if consent.status == ConsentStatus::Active {
            self.service.transition_dossier(
                order_id,
                dossier_id,
                DossierStatus::AdminEnedis(EnedisStatus::ConsentActive),
                &Actor::system(),
                None,
                TransitionGate::None,
                Some("consent activated by the utility".to_string()),
            )?;
        }

        debug!(consent_id = %consent_id.0, dossier_id = %dossier_id.0, status = consent.status.label(), "consent requested");
        Ok(consent)
    }

    /// Utility callback (or poll result) reporting that a pending consent
    /// became active. Re-delivery of the callback is a no-op.
    pub fn activate_consent(
        &self,
        consent_id: &ConsentId,
        now: DateTime<Utc>,
    ) -> Result<EnedisConsent, TrackingError> {
        let mut consent = self.fetch_consent(consent_id)?;

        match consent.effective_status(now) {
            ConsentStatus::Pending => {}
            ConsentStatus::Active => return Ok(consent),
            ConsentStatus::Revoked => {
                return Err(TrackingError::ConsentInvalid(
                    "consent has been revoked".to_string(),
                ))
            }
            ConsentStatus::Expired => {
                return Err(TrackingError::ConsentExpired(
                    "consent has expired".to_string(),
                ))
            }
        }

        consent.status = ConsentStatus::Active;
        consent.consent_date = Some(now);
        self.service.store().upsert_consent(consent.clone())?;

        self.advance_dossier_if(
            &consent,
            EnedisStatus::ConsentRequested,
            EnedisStatus::ConsentActive,
            "consent activated",
        )?;

        Ok(consent)
    }

    /// Pull consumption data through an active consent, advancing the
    /// dossier to `data_retrieved`. Transient gateway failures leave every
    /// piece of state exactly as it was.
    pub async fn sync_consumption(
        &self,
        consent_id: &ConsentId,
        now: DateTime<Utc>,
    ) -> Result<DataRange, TrackingError> {
        let mut consent = self.fetch_consent(consent_id)?;

        match consent.effective_status(now) {
            ConsentStatus::Active => {}
            ConsentStatus::Pending => {
                return Err(TrackingError::ConsentInvalid(
                    "consent is not active yet".to_string(),
                ))
            }
            ConsentStatus::Revoked => {
                return Err(TrackingError::ConsentInvalid(
                    "consent has been revoked".to_string(),
                ))
            }
            ConsentStatus::Expired => {
                self.mark_expired(&mut consent)?;
                return Err(TrackingError::ConsentExpired(
                    "consent expired 12 months after activation".to_string(),
                ));
            }
        }

        let pull = match self
            .gateway
            .pull_consumption(consent_id, &consent.pdl)
            .await
        {
            Ok(pull) => pull,
            Err(ConsentApiError::ConsentExpired(message)) => {
                // The utility is authoritative; mirror the expiry even if
                // our own clock has not reached it yet.
                self.mark_expired(&mut consent)?;
                return Err(TrackingError::ConsentExpired(message));
            }
            Err(other) => {
                warn!(consent_id = %consent_id.0, error = %other, "consumption pull failed");
                return Err(other.into());
            }
        };

        let record_count = pull.hourly_values.len();
        consent.last_sync_at = Some(pull.synced_at);
        self.service.store().upsert_consent(consent.clone())?;

        self.advance_dossier_if(
            &consent,
            EnedisStatus::ConsentActive,
            EnedisStatus::DataRetrieved,
            "consumption data retrieved",
        )?;

        Ok(year_range(pull.synced_at, record_count))
    }

    /// Explicit revocation by an administrator or the customer. Terminal:
    /// no further sync will be attempted.
    pub fn revoke_consent(
        &self,
        consent_id: &ConsentId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<EnedisConsent, TrackingError> {
        let mut consent = self.fetch_consent(consent_id)?;

        match consent.effective_status(now) {
            ConsentStatus::Active => {}
            ConsentStatus::Expired => {
                self.mark_expired(&mut consent)?;
                return Err(TrackingError::ConsentExpired(
                    "an expired consent cannot be revoked".to_string(),
                ));
            }
            other => {
                return Err(TrackingError::InvalidTransition {
                    from: other.label().to_string(),
                    to: ConsentStatus::Revoked.label().to_string(),
                })
            }
        }

        consent.status = ConsentStatus::Revoked;
        self.service.store().upsert_consent(consent.clone())?;

        self.advance_dossier_if(
            &consent,
            EnedisStatus::ConsentActive,
            EnedisStatus::Revoked,
            "consent revoked",
        )?;

        debug!(consent_id = %consent_id.0, actor = %actor.id, "consent revoked");
        Ok(consent)
    }

    /// Read a consent, persisting lazy expiry if this consult is the first
    /// to observe it.
    pub fn consent(
        &self,
        consent_id: &ConsentId,
        now: DateTime<Utc>,
    ) -> Result<EnedisConsent, TrackingError> {
        let mut consent = self.fetch_consent(consent_id)?;
        if consent.status == ConsentStatus::Active
            && consent.effective_status(now) == ConsentStatus::Expired
        {
            self.mark_expired(&mut consent)?;
        }
        Ok(consent)
    }

    fn fetch_consent(&self, consent_id: &ConsentId) -> Result<EnedisConsent, TrackingError> {
        self.service
            .store()
            .fetch_consent(consent_id)?
            .ok_or(TrackingError::NotFound("consent"))
    }

    fn mark_expired(&self, consent: &mut EnedisConsent) -> Result<(), TrackingError> {
        consent.status = ConsentStatus::Expired;
        self.service.store().upsert_consent(consent.clone())?;
        self.advance_dossier_if(
            consent,
            EnedisStatus::ConsentActive,
            EnedisStatus::Expired,
            "consent expired",
        )
    }

    /// Move the owning dossier from `from` to `to` if it still sits at
    /// `from`; a dossier that already progressed keeps its last reached
    /// status.
    fn advance_dossier_if(
        &self,
        consent: &EnedisConsent,
        from: EnedisStatus,
        to: EnedisStatus,
        reason: &str,
    ) -> Result<(), TrackingError> {
        let record = self.service.order(&consent.order_id)?;
        let dossier = record
            .dossier(&consent.dossier_id)
            .ok_or(TrackingError::NotFound("dossier"))?;
        if dossier.status != DossierStatus::AdminEnedis(from) {
            return Ok(());
        }

        self.service.transition_dossier(
            &consent.order_id,
            &consent.dossier_id,
            DossierStatus::AdminEnedis(to),
            &Actor::system(),
            None,
            TransitionGate::None,
            Some(reason.to_string()),
        )?;
        Ok(())
    }
}

/// Calendar year covered by a sync, derived from the sync instant.
fn year_range(synced_at: DateTime<Utc>, record_count: usize) -> DataRange {
    let year = synced_at.year();
    let start = Utc
        .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(synced_at);
    let end = Utc
        .with_ymd_and_hms(year, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(synced_at);
    DataRange {
        start,
        end,
        record_count,
    }
}
