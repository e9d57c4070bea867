//! Order and dossier lifecycle tracking.
//!
//! An order carries up to four administrative dossiers, each a small state
//! machine of its own. The service facade in [`service`] applies gated,
//! version-checked transitions and records every outcome on append-only
//! ledgers; [`consent`] layers the asynchronous Enedis consent lifecycle on
//! top of the `admin_enedis` dossier.

pub mod consent;
pub mod domain;
pub mod dossier;
pub mod ledger;
pub mod repository;
pub mod router;
pub mod service;
pub mod validation;

pub use consent::{
    ConsentApiError, ConsentGateway, ConsentReceipt, ConsentRequestInput, ConsentStatus,
    ConsentSyncManager, ConsumptionPull, DataRange, EnedisConsent, ReceiptStatus,
    CONSENT_VALIDITY_MONTHS,
};
pub use domain::{
    Actor, ActorKind, ConsentId, Document, DocumentId, DocumentKind, DossierId, LineItem, Order,
    OrderId, OrderStatus, PaymentStatus, ShippingAddress,
};
pub use dossier::{
    ConsuelStatus, Dossier, DossierStatus, DossierType, EnedisStatus, InstallationStatus,
    ShippingStatus, TransitionError, TransitionGate,
};
pub use ledger::{AdminNote, DossierEvent, EventId, Ledger, NoteId};
pub use repository::{OrderRecord, RepositoryError, TrackingStore};
pub use router::{tracking_router, DossierView, TrackingApi};
pub use service::{NewDocument, NewOrder, TrackingError, TrackingService};
pub use validation::{
    is_valid_pdl, validate_consent_request, validate_technical_visit_form, FieldError,
    TechnicalVisitForm, MIN_PHOTOS_REQUIRED, VALID_ELECTRICAL_DISTANCES, VALID_ROOF_TYPES,
};
