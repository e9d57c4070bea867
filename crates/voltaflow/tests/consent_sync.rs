//! Integration scenarios for the Enedis consent lifecycle: request,
//! activation, consumption sync, revocation, and lazy twelve-month expiry.

mod common {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;

    use voltaflow::tracking::{
        ConsentApiError, ConsentGateway, ConsentId, ConsentReceipt, ConsentRequestInput,
        ConsentSyncManager, ConsumptionPull, Document, Dossier, DossierType, EnedisConsent,
        NewOrder, Order, OrderId, OrderRecord, PaymentStatus, ReceiptStatus, RepositoryError,
        ShippingAddress, TrackingService, TrackingStore,
    };

    #[derive(Default)]
    pub(super) struct MemoryStore {
        orders: Mutex<HashMap<OrderId, OrderRecord>>,
        consents: Mutex<HashMap<ConsentId, EnedisConsent>>,
    }

    impl TrackingStore for MemoryStore {
        fn insert_order(&self, record: OrderRecord) -> Result<OrderRecord, RepositoryError> {
            let mut guard = self.orders.lock().expect("lock");
            if guard.contains_key(&record.order.order_id) {
                return Err(RepositoryError::Conflict);
            }
            guard.insert(record.order.order_id.clone(), record.clone());
            Ok(record)
        }

        fn fetch_order(&self, order_id: &OrderId) -> Result<Option<OrderRecord>, RepositoryError> {
            let guard = self.orders.lock().expect("lock");
            Ok(guard.get(order_id).cloned())
        }

        fn update_order(&self, order: Order) -> Result<(), RepositoryError> {
            let mut guard = self.orders.lock().expect("lock");
            match guard.get_mut(&order.order_id) {
                Some(record) => {
                    record.order = order;
                    Ok(())
                }
                None => Err(RepositoryError::NotFound),
            }
        }

        fn update_dossier(
            &self,
            dossier: Dossier,
            expected_version: u64,
        ) -> Result<(), RepositoryError> {
            let mut guard = self.orders.lock().expect("lock");
            let record = guard
                .get_mut(&dossier.order_id)
                .ok_or(RepositoryError::NotFound)?;
            let stored = record
                .dossiers
                .iter_mut()
                .find(|candidate| candidate.dossier_id == dossier.dossier_id)
                .ok_or(RepositoryError::NotFound)?;
            if stored.version != expected_version {
                return Err(RepositoryError::VersionConflict {
                    expected: expected_version,
                    actual: stored.version,
                });
            }
            *stored = dossier;
            Ok(())
        }

        fn append_document(&self, document: Document) -> Result<(), RepositoryError> {
            let mut guard = self.orders.lock().expect("lock");
            let record = guard
                .get_mut(&document.order_id)
                .ok_or(RepositoryError::NotFound)?;
            let dossier = record
                .dossiers
                .iter_mut()
                .find(|candidate| candidate.dossier_id == document.dossier_id)
                .ok_or(RepositoryError::NotFound)?;
            dossier.documents.push(document);
            Ok(())
        }

        fn upsert_consent(&self, consent: EnedisConsent) -> Result<(), RepositoryError> {
            let mut guard = self.consents.lock().expect("lock");
            guard.insert(consent.consent_id.clone(), consent);
            Ok(())
        }

        fn fetch_consent(
            &self,
            consent_id: &ConsentId,
        ) -> Result<Option<EnedisConsent>, RepositoryError> {
            let guard = self.consents.lock().expect("lock");
            Ok(guard.get(consent_id).cloned())
        }
    }

    /// Programmable gateway double: each test sets the behavior of the
    /// next consent request and the next consumption pull.
    #[derive(Clone, Copy, Debug)]
    pub(super) enum ConsentMode {
        Pending,
        ActiveImmediately,
        Unavailable,
    }

    #[derive(Clone, Copy, Debug)]
    pub(super) enum PullMode {
        Data,
        Unavailable,
        DataNotFound,
        ReportedExpired,
    }

    pub(super) struct ScriptedGateway {
        pub(super) consent_mode: Mutex<ConsentMode>,
        pub(super) pull_mode: Mutex<PullMode>,
        pub(super) pull_calls: Mutex<u32>,
    }

    impl ScriptedGateway {
        pub(super) fn new() -> Self {
            Self {
                consent_mode: Mutex::new(ConsentMode::Pending),
                pull_mode: Mutex::new(PullMode::Data),
                pull_calls: Mutex::new(0),
            }
        }

        pub(super) fn set_pull_mode(&self, mode: PullMode) {
            *self.pull_mode.lock().expect("lock") = mode;
        }

        pub(super) fn set_consent_mode(&self, mode: ConsentMode) {
            *self.consent_mode.lock().expect("lock") = mode;
        }

        pub(super) fn pull_calls(&self) -> u32 {
            *self.pull_calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl ConsentGateway for ScriptedGateway {
        async fn request_consent(
            &self,
            _request: &ConsentRequestInput,
        ) -> Result<ConsentReceipt, ConsentApiError> {
            let mode = *self.consent_mode.lock().expect("lock");
            match mode {
                ConsentMode::Pending => Ok(ConsentReceipt {
                    consent_id: ConsentId(String::new()),
                    status: ReceiptStatus::Pending,
                    created_at: Utc::now(),
                }),
                ConsentMode::ActiveImmediately => Ok(ConsentReceipt {
                    consent_id: ConsentId("enedis-00000001".to_string()),
                    status: ReceiptStatus::Active,
                    created_at: Utc::now(),
                }),
                ConsentMode::Unavailable => Err(ConsentApiError::Unavailable(
                    "consent endpoint did not respond".to_string(),
                )),
            }
        }

        async fn pull_consumption(
            &self,
            _consent_id: &ConsentId,
            pdl: &str,
        ) -> Result<ConsumptionPull, ConsentApiError> {
            *self.pull_calls.lock().expect("lock") += 1;
            let mode = *self.pull_mode.lock().expect("lock");
            match mode {
                PullMode::Data => Ok(ConsumptionPull {
                    pdl: pdl.to_string(),
                    hourly_values: vec![450; 8760],
                    monthly_values: vec![340; 12],
                    synced_at: Utc::now(),
                }),
                PullMode::Unavailable => Err(ConsentApiError::Unavailable(
                    "metering endpoint did not respond".to_string(),
                )),
                PullMode::DataNotFound => Err(ConsentApiError::DataNotFound(format!(
                    "no consumption data published for PDL {pdl}"
                ))),
                PullMode::ReportedExpired => Err(ConsentApiError::ConsentExpired(
                    "consent no longer valid according to the utility".to_string(),
                )),
            }
        }
    }

    pub(super) struct Fixture {
        pub(super) service: Arc<TrackingService<MemoryStore>>,
        pub(super) manager: ConsentSyncManager<MemoryStore, ScriptedGateway>,
        pub(super) gateway: Arc<ScriptedGateway>,
        pub(super) order_id: OrderId,
        pub(super) dossier_id: voltaflow::tracking::DossierId,
    }

    pub(super) fn fixture() -> Fixture {
        let service = Arc::new(TrackingService::new(Arc::new(MemoryStore::default())));
        let gateway = Arc::new(ScriptedGateway::new());
        let manager = ConsentSyncManager::new(service.clone(), gateway.clone());

        let record = service
            .create_order(
                NewOrder {
                    total_amount_cents: 1_249_000,
                    payment_status: PaymentStatus::Paid,
                    shipping_address: ShippingAddress {
                        first_name: "Claire".to_string(),
                        last_name: "Durand".to_string(),
                        email: "claire.durand@example.org".to_string(),
                        phone: "+33612345678".to_string(),
                        address_line1: "12 rue des Lilas".to_string(),
                        address_line2: None,
                        postal_code: "31000".to_string(),
                        city: "Toulouse".to_string(),
                        country: Some("FR".to_string()),
                    },
                    items: Vec::new(),
                    dossier_types: vec![DossierType::AdminEnedis],
                },
                &voltaflow::tracking::Actor::admin("ops-1"),
            )
            .expect("order created");

        Fixture {
            service,
            manager,
            gateway,
            order_id: record.order.order_id,
            dossier_id: record.dossiers[0].dossier_id.clone(),
        }
    }

    pub(super) fn valid_input() -> ConsentRequestInput {
        ConsentRequestInput {
            pdl: "12345678901234".to_string(),
            last_name: "Durand".to_string(),
            address: "12 rue des Lilas, 31000 Toulouse".to_string(),
        }
    }
}

mod lifecycle {
    use super::common::*;
    use chrono::{Duration, Utc};
    use voltaflow::tracking::{
        ConsentStatus, DossierStatus, EnedisStatus, TrackingError,
    };

    fn dossier_status(fixture: &Fixture) -> DossierStatus {
        fixture
            .service
            .order(&fixture.order_id)
            .expect("order readable")
            .dossier(&fixture.dossier_id)
            .expect("dossier present")
            .status
    }

    #[tokio::test]
    async fn requesting_a_consent_advances_the_dossier() {
        let fx = fixture();
        let consent = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await
            .expect("consent requested");

        assert_eq!(consent.status, ConsentStatus::Pending);
        assert!(consent.consent_date.is_none());
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::ConsentRequested)
        );
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_gateway() {
        let fx = fixture();
        let mut input = valid_input();
        input.pdl = "1234".to_string();

        let result = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, input)
            .await;
        assert!(matches!(result, Err(TrackingError::ValidationFailed(_))));
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::NotStarted)
        );
    }

    #[tokio::test]
    async fn gateway_outage_during_request_leaves_no_partial_state() {
        let fx = fixture();
        fx.gateway.set_consent_mode(ConsentMode::Unavailable);

        let result = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await;
        assert!(matches!(
            result,
            Err(TrackingError::ExternalUnavailable(_))
        ));
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::NotStarted)
        );
        let record = fx.service.order(&fx.order_id).expect("order readable");
        assert!(record.dossier(&fx.dossier_id).expect("dossier").consent_id.is_none());
    }

    #[tokio::test]
    async fn an_immediately_active_receipt_skips_the_pending_stage() {
        let fx = fixture();
        fx.gateway.set_consent_mode(ConsentMode::ActiveImmediately);

        let consent = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await
            .expect("consent requested");
        assert_eq!(consent.status, ConsentStatus::Active);
        assert!(consent.consent_date.is_some());
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::ConsentActive)
        );
    }

    #[tokio::test]
    async fn activation_then_sync_retrieves_data_and_advances_the_dossier() {
        let fx = fixture();
        let consent = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await
            .expect("consent requested");

        fx.manager
            .activate_consent(&consent.consent_id, Utc::now())
            .expect("consent activated");
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::ConsentActive)
        );

        let range = fx
            .manager
            .sync_consumption(&consent.consent_id, Utc::now())
            .await
            .expect("sync succeeds");
        assert_eq!(range.record_count, 8760);
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::DataRetrieved)
        );

        let stored = fx
            .manager
            .consent(&consent.consent_id, Utc::now())
            .expect("consent readable");
        assert!(stored.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn activation_callbacks_are_idempotent() {
        let fx = fixture();
        let consent = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await
            .expect("consent requested");

        let first = fx
            .manager
            .activate_consent(&consent.consent_id, Utc::now())
            .expect("first activation");
        let second = fx
            .manager
            .activate_consent(&consent.consent_id, Utc::now())
            .expect("redelivered activation");
        assert_eq!(first.consent_date, second.consent_date);
    }

    #[tokio::test]
    async fn transient_pull_failures_leave_consent_and_dossier_untouched() {
        let fx = fixture();
        let consent = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await
            .expect("consent requested");
        fx.manager
            .activate_consent(&consent.consent_id, Utc::now())
            .expect("activated");

        for (mode, check) in [
            (PullMode::Unavailable, "ENEDIS_API_UNAVAILABLE"),
            (PullMode::DataNotFound, "ENEDIS_DATA_NOT_FOUND"),
        ] {
            fx.gateway.set_pull_mode(mode);
            let result = fx
                .manager
                .sync_consumption(&consent.consent_id, Utc::now())
                .await;
            let error = result.expect_err("pull fails");
            assert!(error.to_string().contains(check), "{error}");
            assert_eq!(
                dossier_status(&fx),
                DossierStatus::AdminEnedis(EnedisStatus::ConsentActive)
            );
        }

        let stored = fx
            .manager
            .consent(&consent.consent_id, Utc::now())
            .expect("consent readable");
        assert!(stored.last_sync_at.is_none());
        assert_eq!(stored.status, ConsentStatus::Active);
    }

    #[tokio::test]
    async fn a_sync_after_twelve_months_expires_the_consent_without_calling_out() {
        let fx = fixture();
        let consent = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await
            .expect("consent requested");

        let activated_at = Utc::now() - Duration::days(400);
        fx.manager
            .activate_consent(&consent.consent_id, activated_at)
            .expect("activated in the past");
        let calls_before = fx.gateway.pull_calls();

        let result = fx
            .manager
            .sync_consumption(&consent.consent_id, Utc::now())
            .await;
        assert!(matches!(result, Err(TrackingError::ConsentExpired(_))));
        assert_eq!(fx.gateway.pull_calls(), calls_before);

        let stored = fx
            .manager
            .consent(&consent.consent_id, Utc::now())
            .expect("consent readable");
        assert_eq!(stored.status, ConsentStatus::Expired);
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::Expired)
        );
    }

    #[tokio::test]
    async fn an_expiry_reported_by_the_utility_is_mirrored() {
        let fx = fixture();
        let consent = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await
            .expect("consent requested");
        fx.manager
            .activate_consent(&consent.consent_id, Utc::now())
            .expect("activated");
        fx.gateway.set_pull_mode(PullMode::ReportedExpired);

        let result = fx
            .manager
            .sync_consumption(&consent.consent_id, Utc::now())
            .await;
        assert!(matches!(result, Err(TrackingError::ConsentExpired(_))));

        let stored = fx
            .manager
            .consent(&consent.consent_id, Utc::now())
            .expect("consent readable");
        assert_eq!(stored.status, ConsentStatus::Expired);
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::Expired)
        );
    }

    #[tokio::test]
    async fn revocation_is_terminal_and_only_valid_from_active() {
        let fx = fixture();
        let admin = voltaflow::tracking::Actor::admin("ops-1");
        let consent = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await
            .expect("consent requested");

        let pending_revoke = fx
            .manager
            .revoke_consent(&consent.consent_id, &admin, Utc::now());
        assert!(matches!(
            pending_revoke,
            Err(TrackingError::InvalidTransition { .. })
        ));

        fx.manager
            .activate_consent(&consent.consent_id, Utc::now())
            .expect("activated");
        let revoked = fx
            .manager
            .revoke_consent(&consent.consent_id, &admin, Utc::now())
            .expect("revoked");
        assert_eq!(revoked.status, ConsentStatus::Revoked);
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::Revoked)
        );

        let sync_after = fx
            .manager
            .sync_consumption(&consent.consent_id, Utc::now())
            .await;
        assert!(matches!(sync_after, Err(TrackingError::ConsentInvalid(_))));
    }

    #[tokio::test]
    async fn reading_a_consent_persists_lazy_expiry() {
        let fx = fixture();
        let consent = fx
            .manager
            .request_consent(&fx.order_id, &fx.dossier_id, valid_input())
            .await
            .expect("consent requested");
        fx.manager
            .activate_consent(&consent.consent_id, Utc::now() - Duration::days(400))
            .expect("activated in the past");

        let observed = fx
            .manager
            .consent(&consent.consent_id, Utc::now())
            .expect("consent readable");
        assert_eq!(observed.status, ConsentStatus::Expired);
        assert_eq!(
            dossier_status(&fx),
            DossierStatus::AdminEnedis(EnedisStatus::Expired)
        );
    }
}
