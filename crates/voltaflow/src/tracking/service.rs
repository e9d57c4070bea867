use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::domain::{
    Actor, ActorKind, Document, DocumentId, DocumentKind, DossierId, LineItem, Order, OrderId,
    OrderStatus, PaymentStatus, ShippingAddress,
};
use super::dossier::{
    Dossier, DossierStatus, DossierType, ShippingStatus, TransitionError,
    TransitionGate,
};
use super::ledger::{AdminNote, DossierEvent, Ledger};
use super::repository::{OrderRecord, RepositoryError, TrackingStore};
use super::validation::{FieldError, TechnicalVisitForm};

static ORDER_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static DOSSIER_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static DOCUMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_order_id() -> OrderId {
    let id = ORDER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    OrderId(format!("ord-{id:06}"))
}

fn next_dossier_id() -> DossierId {
    let id = DOSSIER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    DossierId(format!("dos-{id:06}"))
}

fn next_document_id() -> DocumentId {
    let id = DOCUMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    DocumentId(format!("doc-{id:06}"))
}

/// Checkout payload handed over by the storefront once payment completed.
/// The dossier set is determined by the product configuration upstream.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub total_amount_cents: u32,
    pub payment_status: PaymentStatus,
    pub shipping_address: ShippingAddress,
    pub items: Vec<LineItem>,
    pub dossier_types: Vec<DossierType>,
}

/// Document attachment payload; the storage key is an opaque blob handle.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub kind: DocumentKind,
    pub file_name: String,
    pub content_type: String,
    pub storage_key: String,
}

/// Errors surfaced by the tracking service. Every mutating call returns
/// either a success value or exactly one of these kinds.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("validation failed")]
    ValidationFailed(Vec<FieldError>),
    #[error("transition from \"{from}\" to \"{to}\" is not allowed")]
    InvalidTransition { from: String, to: String },
    #[error("version conflict: expected version {expected}, current version is {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("ENEDIS_API_UNAVAILABLE: {0}")]
    ExternalUnavailable(String),
    #[error("ENEDIS_DATA_NOT_FOUND: {0}")]
    ExternalDataAbsent(String),
    #[error("ENEDIS_CONSENT_INVALID: {0}")]
    ConsentInvalid(String),
    #[error("ENEDIS_CONSENT_EXPIRED: {0}")]
    ConsentExpired(String),
    #[error("caller is not authorized")]
    Unauthorized,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<TransitionError> for TrackingError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            TransitionError::VersionConflict { expected, actual } => {
                Self::VersionConflict { expected, actual }
            }
            TransitionError::ValidationFailed(errors) => Self::ValidationFailed(errors),
        }
    }
}

impl From<RepositoryError> for TrackingError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => Self::NotFound("record"),
            RepositoryError::VersionConflict { expected, actual } => {
                Self::VersionConflict { expected, actual }
            }
            RepositoryError::Conflict => Self::StoreUnavailable("record already exists".to_string()),
            RepositoryError::Unavailable(message) => Self::StoreUnavailable(message),
        }
    }
}

/// Order aggregate facade: routes administrative actions to the dossier
/// state machines and records the outcome on the ledgers.
pub struct TrackingService<S> {
    store: Arc<S>,
    ledger: Arc<Ledger>,
}

impl<S> TrackingService<S>
where
    S: TrackingStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            ledger: Arc::new(Ledger::new()),
        }
    }

    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Create an order with its initial dossier set, one creation event per
    /// dossier.
    pub fn create_order(
        &self,
        new_order: NewOrder,
        actor: &Actor,
    ) -> Result<OrderRecord, TrackingError> {
        let now = Utc::now();
        let order_id = next_order_id();

        let order = Order {
            order_id: order_id.clone(),
            status: OrderStatus::Pending,
            created_at: now,
            total_amount_cents: new_order.total_amount_cents,
            payment_status: new_order.payment_status,
            shipping_address: new_order.shipping_address,
            items: new_order.items,
        };

        let dossiers: Vec<Dossier> = new_order
            .dossier_types
            .iter()
            .map(|dossier_type| {
                Dossier::new(next_dossier_id(), order_id.clone(), *dossier_type, now)
            })
            .collect();

        let record = self.store.insert_order(OrderRecord { order, dossiers })?;

        for dossier in &record.dossiers {
            self.ledger.append_event(
                dossier.dossier_id.clone(),
                None,
                dossier.status,
                actor.clone(),
                now,
                Some("dossier created".to_string()),
            );
        }

        debug!(order_id = %record.order.order_id.0, dossiers = record.dossiers.len(), "order created");
        Ok(record)
    }

    /// Advance the order along its linear status chain, or cancel it.
    ///
    /// `delivered` additionally requires every shipping dossier to be
    /// delivered itself; that precondition lives here, not in the dossier
    /// machine.
    pub fn change_order_status(
        &self,
        order_id: &OrderId,
        requested: OrderStatus,
        actor: &Actor,
    ) -> Result<Order, TrackingError> {
        let record = self
            .store
            .fetch_order(order_id)?
            .ok_or(TrackingError::NotFound("order"))?;

        let current = record.order.status;
        if !current.can_transition_to(requested) {
            return Err(TrackingError::InvalidTransition {
                from: current.label().to_string(),
                to: requested.label().to_string(),
            });
        }

        if requested == OrderStatus::Delivered {
            let undelivered_shipping = record.dossiers.iter().any(|dossier| {
                matches!(
                    dossier.status,
                    DossierStatus::Shipping(status) if status != ShippingStatus::Delivered
                )
            });
            if undelivered_shipping {
                return Err(TrackingError::InvalidTransition {
                    from: current.label().to_string(),
                    to: requested.label().to_string(),
                });
            }
        }

        let mut order = record.order;
        order.status = requested;
        self.store.update_order(order.clone())?;

        debug!(order_id = %order.order_id.0, from = current.label(), to = requested.label(), actor = %actor.id, "order status changed");
        Ok(order)
    }

    /// Apply an administrative dossier transition.
    ///
    /// Consent terminals (`revoked`, `expired`) belong to the consent sync
    /// manager; administrative callers cannot request them directly.
    pub fn apply_dossier_transition(
        &self,
        order_id: &OrderId,
        dossier_id: &DossierId,
        requested: DossierStatus,
        actor: &Actor,
        expected_version: u64,
        technical_visit: Option<&TechnicalVisitForm>,
    ) -> Result<Dossier, TrackingError> {
        if actor.kind != ActorKind::System {
            if let DossierStatus::AdminEnedis(status) = requested {
                if status.is_consent_terminal() {
                    let record = self
                        .store
                        .fetch_order(order_id)?
                        .ok_or(TrackingError::NotFound("order"))?;
                    let current = record
                        .dossier(dossier_id)
                        .ok_or(TrackingError::NotFound("dossier"))?
                        .status;
                    return Err(TrackingError::InvalidTransition {
                        from: current.label().to_string(),
                        to: status.label().to_string(),
                    });
                }
            }
        }

        let gate = match technical_visit {
            Some(form) => TransitionGate::TechnicalVisit(form),
            None => TransitionGate::None,
        };
        self.transition_dossier(order_id, dossier_id, requested, actor, Some(expected_version), gate, None)
    }

    /// Transition path shared with the consent sync manager. When
    /// `expected_version` is `None` the dossier's current version is used
    /// (system-driven transitions have no prior read to defend).
    pub(crate) fn transition_dossier(
        &self,
        order_id: &OrderId,
        dossier_id: &DossierId,
        requested: DossierStatus,
        actor: &Actor,
        expected_version: Option<u64>,
        gate: TransitionGate<'_>,
        reason: Option<String>,
    ) -> Result<Dossier, TrackingError> {
        let now = Utc::now();
        let record = self
            .store
            .fetch_order(order_id)?
            .ok_or(TrackingError::NotFound("order"))?;
        let mut dossier = record
            .dossier(dossier_id)
            .ok_or(TrackingError::NotFound("dossier"))?
            .clone();

        let expected = expected_version.unwrap_or(dossier.version);
        let applied = dossier.apply_transition(requested, expected, gate, now)?;

        // The store revalidates the version; under concurrency exactly one
        // of two writers from the same observed version wins.
        self.store.update_dossier(dossier.clone(), expected)?;

        self.ledger.append_event(
            dossier.dossier_id.clone(),
            Some(applied.from),
            applied.to,
            actor.clone(),
            now,
            reason,
        );

        debug!(
            dossier_id = %dossier.dossier_id.0,
            from = applied.from.label(),
            to = applied.to.label(),
            actor = %actor.id,
            "dossier transition applied"
        );
        Ok(dossier)
    }

    /// Record which consent a dossier is tracked by. Metadata only; the
    /// dossier's version is left alone so a concurrent transition from the
    /// same observed version still wins or loses on its own merit.
    pub(crate) fn attach_consent(
        &self,
        order_id: &OrderId,
        dossier_id: &DossierId,
        consent_id: super::domain::ConsentId,
    ) -> Result<(), TrackingError> {
        let record = self
            .store
            .fetch_order(order_id)?
            .ok_or(TrackingError::NotFound("order"))?;
        let mut dossier = record
            .dossier(dossier_id)
            .ok_or(TrackingError::NotFound("dossier"))?
            .clone();
        dossier.consent_id = Some(consent_id);
        let version = dossier.version;
        self.store.update_dossier(dossier, version)?;
        Ok(())
    }

    /// Append an administrative note to an order or one of its dossiers.
    pub fn add_note(
        &self,
        order_id: &OrderId,
        dossier_id: Option<&DossierId>,
        content: &str,
        actor: &Actor,
    ) -> Result<AdminNote, TrackingError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(TrackingError::ValidationFailed(vec![FieldError::new(
                "content",
                "note content is required",
            )]));
        }

        let record = self
            .store
            .fetch_order(order_id)?
            .ok_or(TrackingError::NotFound("order"))?;
        if let Some(dossier_id) = dossier_id {
            if record.dossier(dossier_id).is_none() {
                return Err(TrackingError::NotFound("dossier"));
            }
        }

        Ok(self.ledger.append_note(
            order_id.clone(),
            dossier_id.cloned(),
            trimmed.to_string(),
            actor,
            Utc::now(),
        ))
    }

    /// Attach an immutable document reference to a dossier.
    pub fn attach_document(
        &self,
        order_id: &OrderId,
        dossier_id: &DossierId,
        new_document: NewDocument,
        actor: &Actor,
    ) -> Result<Document, TrackingError> {
        let record = self
            .store
            .fetch_order(order_id)?
            .ok_or(TrackingError::NotFound("order"))?;
        if record.dossier(dossier_id).is_none() {
            return Err(TrackingError::NotFound("dossier"));
        }

        let document = Document {
            document_id: next_document_id(),
            dossier_id: dossier_id.clone(),
            order_id: order_id.clone(),
            kind: new_document.kind,
            file_name: new_document.file_name,
            content_type: new_document.content_type,
            storage_key: new_document.storage_key,
            uploaded_at: Utc::now(),
            uploaded_by: actor.id.clone(),
        };
        self.store.append_document(document.clone())?;
        Ok(document)
    }

    pub fn order(&self, order_id: &OrderId) -> Result<OrderRecord, TrackingError> {
        self.store
            .fetch_order(order_id)?
            .ok_or(TrackingError::NotFound("order"))
    }

    pub fn dossier_events(&self, dossier_id: &DossierId) -> Vec<DossierEvent> {
        self.ledger.events_for(dossier_id)
    }

    pub fn notes(&self, order_id: &OrderId) -> Vec<AdminNote> {
        self.ledger.notes_for(order_id)
    }
}
