//! Per-type dossier state machines.
//!
//! Each dossier type carries its own status vocabulary and transition
//! table, modelled as one enum variant per type so that a shipping dossier
//! can never hold an installation status. Transitions are applied through
//! [`Dossier::apply_transition`], which enforces table adjacency, the
//! optimistic-concurrency version check, and the technical-visit gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ConsentId, Document, DocumentKind, DossierId, OrderId};
use super::validation::{
    validate_technical_visit_form, FieldError, TechnicalVisitForm, MIN_PHOTOS_REQUIRED,
};

/// The four administrative workflows attached to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DossierType {
    Shipping,
    AdminEnedis,
    AdminConsuel,
    Installation,
}

impl DossierType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Shipping => "Order shipping",
            Self::AdminEnedis => "Enedis grid consent",
            Self::AdminConsuel => "Consuel certification",
            Self::Installation => "On-site installation",
        }
    }

    pub const fn ordered() -> [Self; 4] {
        [
            Self::Shipping,
            Self::AdminEnedis,
            Self::AdminConsuel,
            Self::Installation,
        ]
    }

    pub const fn initial_status(self) -> DossierStatus {
        match self {
            Self::Shipping => DossierStatus::Shipping(ShippingStatus::Preparing),
            Self::AdminEnedis => DossierStatus::AdminEnedis(EnedisStatus::NotStarted),
            Self::AdminConsuel => DossierStatus::AdminConsuel(ConsuelStatus::NotStarted),
            Self::Installation => {
                DossierStatus::Installation(InstallationStatus::AwaitingSiteVisit)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    Preparing,
    Shipped,
    Delivered,
}

impl ShippingStatus {
    pub const fn successors(self) -> &'static [Self] {
        match self {
            Self::Preparing => &[Self::Shipped],
            Self::Shipped => &[Self::Delivered],
            Self::Delivered => &[],
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatus {
    AwaitingSiteVisit,
    SiteVisitCompleted,
    Scheduled,
    Installed,
}

impl InstallationStatus {
    pub const fn successors(self) -> &'static [Self] {
        match self {
            Self::AwaitingSiteVisit => &[Self::SiteVisitCompleted],
            Self::SiteVisitCompleted => &[Self::Scheduled],
            Self::Scheduled => &[Self::Installed],
            Self::Installed => &[],
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::AwaitingSiteVisit => "awaiting_site_visit",
            Self::SiteVisitCompleted => "site_visit_completed",
            Self::Scheduled => "scheduled",
            Self::Installed => "installed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnedisStatus {
    NotStarted,
    ConsentRequested,
    ConsentActive,
    DataRetrieved,
    Completed,
    Revoked,
    Expired,
}

impl EnedisStatus {
    pub const fn successors(self) -> &'static [Self] {
        match self {
            Self::NotStarted => &[Self::ConsentRequested],
            Self::ConsentRequested => &[Self::ConsentActive],
            Self::ConsentActive => &[Self::DataRetrieved, Self::Revoked, Self::Expired],
            Self::DataRetrieved => &[Self::Completed],
            Self::Completed | Self::Revoked | Self::Expired => &[],
        }
    }

    /// Statuses that only the consent sync manager may drive a dossier
    /// into; direct administrative transitions to these are refused.
    pub const fn is_consent_terminal(self) -> bool {
        matches!(self, Self::Revoked | Self::Expired)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::ConsentRequested => "consent_requested",
            Self::ConsentActive => "consent_active",
            Self::DataRetrieved => "data_retrieved",
            Self::Completed => "completed",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsuelStatus {
    NotStarted,
    Submitted,
    Approved,
    Rejected,
}

impl ConsuelStatus {
    pub const fn successors(self) -> &'static [Self] {
        match self {
            Self::NotStarted => &[Self::Submitted],
            Self::Submitted => &[Self::Approved, Self::Rejected],
            Self::Approved => &[],
            // A rejection is terminal for the submission, not for the
            // dossier: a fresh submission opens a new round trip in the
            // event log.
            Self::Rejected => &[Self::Submitted],
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Status of a dossier, tagged by type so illegal cross-type values cannot
/// be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "dossier_type", content = "status", rename_all = "snake_case")]
pub enum DossierStatus {
    Shipping(ShippingStatus),
    AdminEnedis(EnedisStatus),
    AdminConsuel(ConsuelStatus),
    Installation(InstallationStatus),
}

impl DossierStatus {
    pub const fn dossier_type(self) -> DossierType {
        match self {
            Self::Shipping(_) => DossierType::Shipping,
            Self::AdminEnedis(_) => DossierType::AdminEnedis,
            Self::AdminConsuel(_) => DossierType::AdminConsuel,
            Self::Installation(_) => DossierType::Installation,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Shipping(status) => status.label(),
            Self::AdminEnedis(status) => status.label(),
            Self::AdminConsuel(status) => status.label(),
            Self::Installation(status) => status.label(),
        }
    }

    /// Statuses directly reachable from this one in its type's table.
    pub fn allowed_transitions(self) -> Vec<DossierStatus> {
        match self {
            Self::Shipping(status) => status
                .successors()
                .iter()
                .map(|next| Self::Shipping(*next))
                .collect(),
            Self::AdminEnedis(status) => status
                .successors()
                .iter()
                .map(|next| Self::AdminEnedis(*next))
                .collect(),
            Self::AdminConsuel(status) => status
                .successors()
                .iter()
                .map(|next| Self::AdminConsuel(*next))
                .collect(),
            Self::Installation(status) => status
                .successors()
                .iter()
                .map(|next| Self::Installation(*next))
                .collect(),
        }
    }

    pub fn can_advance_to(self, requested: DossierStatus) -> bool {
        self.allowed_transitions().contains(&requested)
    }

    pub fn is_final_state(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

/// Errors raised while applying a dossier transition.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("transition from \"{from}\" to \"{to}\" is not allowed")]
    InvalidTransition { from: String, to: String },
    #[error("version conflict: expected version {expected}, dossier is at {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("transition guard rejected the request")]
    ValidationFailed(Vec<FieldError>),
}

/// Upstream material required by a gated transition.
#[derive(Debug, Clone, Copy, Default)]
pub enum TransitionGate<'a> {
    #[default]
    None,
    TechnicalVisit(&'a TechnicalVisitForm),
}

/// The from/to pair of a successfully applied transition, handed to the
/// ledger as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedTransition {
    pub from: DossierStatus,
    pub to: DossierStatus,
}

/// One administrative sub-workflow attached to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dossier {
    pub dossier_id: DossierId,
    pub order_id: OrderId,
    #[serde(flatten)]
    pub status: DossierStatus,
    /// Monotonic counter for optimistic concurrency; every applied
    /// transition increments it.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub documents: Vec<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_visit: Option<TechnicalVisitForm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<ConsentId>,
}

impl Dossier {
    pub fn new(
        dossier_id: DossierId,
        order_id: OrderId,
        dossier_type: DossierType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            dossier_id,
            order_id,
            status: dossier_type.initial_status(),
            version: 0,
            created_at: now,
            updated_at: now,
            documents: Vec::new(),
            technical_visit: None,
            consent_id: None,
        }
    }

    pub const fn dossier_type(&self) -> DossierType {
        self.status.dossier_type()
    }

    fn attached_photo_count(&self) -> usize {
        self.documents
            .iter()
            .filter(|document| document.kind == DocumentKind::Photo)
            .count()
    }

    fn requires_technical_visit_gate(&self, requested: DossierStatus) -> bool {
        self.status == DossierStatus::Installation(InstallationStatus::AwaitingSiteVisit)
            && requested == DossierStatus::Installation(InstallationStatus::SiteVisitCompleted)
    }

    /// Apply a transition to `requested`.
    ///
    /// Checks, in order: the caller's observed version, table adjacency,
    /// and the transition guard. The version check runs first: a stale
    /// observation means the current status cannot be trusted for an
    /// adjacency verdict, and the caller must re-read before retrying.
    /// On success the status and version are updated and the from/to
    /// pair is returned for the event ledger.
    pub fn apply_transition(
        &mut self,
        requested: DossierStatus,
        expected_version: u64,
        gate: TransitionGate<'_>,
        now: DateTime<Utc>,
    ) -> Result<AppliedTransition, TransitionError> {
        if expected_version != self.version {
            return Err(TransitionError::VersionConflict {
                expected: expected_version,
                actual: self.version,
            });
        }

        if !self.status.can_advance_to(requested) {
            return Err(TransitionError::InvalidTransition {
                from: self.status.label().to_string(),
                to: requested.label().to_string(),
            });
        }

        if self.requires_technical_visit_gate(requested) {
            let form = match gate {
                TransitionGate::TechnicalVisit(form) => form,
                TransitionGate::None => {
                    return Err(TransitionError::ValidationFailed(vec![FieldError::new(
                        "technicalVisit",
                        "a technical visit form is required to complete the site visit",
                    )]));
                }
            };

            let mut errors = validate_technical_visit_form(form);
            // Attached photo documents are the source of truth; the form's
            // own photo list cannot vouch for evidence that was never
            // uploaded.
            let attached = self.attached_photo_count();
            if attached < MIN_PHOTOS_REQUIRED {
                errors.push(FieldError::new(
                    "photoIds",
                    format!(
                        "at least {MIN_PHOTOS_REQUIRED} photo documents must be attached ({attached} attached)"
                    ),
                ));
            }

            if !errors.is_empty() {
                return Err(TransitionError::ValidationFailed(errors));
            }

            self.technical_visit = Some(form.clone());
        }

        let applied = AppliedTransition {
            from: self.status,
            to: requested,
        };
        self.status = requested;
        self.version += 1;
        self.updated_at = now;
        Ok(applied)
    }
}
