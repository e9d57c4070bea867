use async_trait::async_trait;
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use voltaflow::tracking::{
    ConsentApiError, ConsentGateway, ConsentId, ConsentReceipt, ConsentRequestInput,
    ConsumptionPull, Document, Dossier, EnedisConsent, Order, OrderId, OrderRecord, ReceiptStatus,
    RepositoryError, TrackingStore,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default)]
pub(crate) struct InMemoryTrackingStore {
    orders: Mutex<HashMap<OrderId, OrderRecord>>,
    consents: Mutex<HashMap<ConsentId, EnedisConsent>>,
}

impl TrackingStore for InMemoryTrackingStore {
    fn insert_order(&self, record: OrderRecord) -> Result<OrderRecord, RepositoryError> {
        let mut guard = self.orders.lock().expect("order mutex poisoned");
        if guard.contains_key(&record.order.order_id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.order.order_id.clone(), record.clone());
        Ok(record)
    }

    fn fetch_order(&self, order_id: &OrderId) -> Result<Option<OrderRecord>, RepositoryError> {
        let guard = self.orders.lock().expect("order mutex poisoned");
        Ok(guard.get(order_id).cloned())
    }

    fn update_order(&self, order: Order) -> Result<(), RepositoryError> {
        let mut guard = self.orders.lock().expect("order mutex poisoned");
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
        let mut guard = self.orders.lock().expect("order mutex poisoned");
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
        let mut guard = self.orders.lock().expect("order mutex poisoned");
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
        let mut guard = self.consents.lock().expect("consent mutex poisoned");
        guard.insert(consent.consent_id.clone(), consent);
        Ok(())
    }

    fn fetch_consent(
        &self,
        consent_id: &ConsentId,
    ) -> Result<Option<EnedisConsent>, RepositoryError> {
        let guard = self.consents.lock().expect("consent mutex poisoned");
        Ok(guard.get(consent_id).cloned())
    }
}

/// Relative weight of each calendar month in a French residential load
/// curve; winter heating dominates.
const MONTHLY_WEIGHTS: [f64; 12] = [
    1.40, 1.30, 1.10, 0.90, 0.75, 0.65, 0.60, 0.62, 0.78, 0.95, 1.20, 1.35,
];

/// Relative weight of each hour of the day, with morning and evening peaks.
const HOURLY_WEIGHTS: [f64; 24] = [
    0.45, 0.38, 0.35, 0.33, 0.34, 0.42, 0.75, 1.10, 1.05, 0.90, 0.85, 0.95, 1.05, 0.90, 0.80,
    0.85, 1.00, 1.30, 1.60, 1.70, 1.50, 1.20, 0.85, 0.60,
];

const DAYS_PER_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Deterministic stand-in for the Enedis data hub. The consumption profile
/// is derived from the PDL digits alone, so repeated pulls for the same
/// meter return identical data. Reserved PDL prefixes simulate upstream
/// failure modes:
///
/// * `00` - the meter exists but has no published data
/// * `99` - the hub is unreachable
pub(crate) struct SimulatedEnedisGateway {
    issued: AtomicU64,
}

impl SimulatedEnedisGateway {
    pub(crate) fn new() -> Self {
        Self {
            issued: AtomicU64::new(1),
        }
    }

    /// Annual consumption in kWh for the meter, between 3000 and 9000.
    fn annual_kwh(pdl: &str) -> f64 {
        let seed: u64 = pdl
            .bytes()
            .fold(0u64, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as u64));
        3000.0 + (seed % 6001) as f64
    }
}

#[async_trait]
impl ConsentGateway for SimulatedEnedisGateway {
    async fn request_consent(
        &self,
        request: &ConsentRequestInput,
    ) -> Result<ConsentReceipt, ConsentApiError> {
        if request.pdl.starts_with("99") {
            return Err(ConsentApiError::Unavailable(
                "consent endpoint did not respond".to_string(),
            ));
        }

        let issued = self.issued.fetch_add(1, Ordering::Relaxed);
        Ok(ConsentReceipt {
            consent_id: ConsentId(format!("enedis-{issued:08}")),
            status: ReceiptStatus::Pending,
            created_at: Utc::now(),
        })
    }

    async fn pull_consumption(
        &self,
        _consent_id: &ConsentId,
        pdl: &str,
    ) -> Result<ConsumptionPull, ConsentApiError> {
        if pdl.starts_with("99") {
            return Err(ConsentApiError::Unavailable(
                "metering endpoint did not respond".to_string(),
            ));
        }
        if pdl.starts_with("00") {
            return Err(ConsentApiError::DataNotFound(format!(
                "no consumption data published for PDL {pdl}"
            )));
        }

        let annual_kwh = Self::annual_kwh(pdl);
        let monthly_weight_total: f64 = MONTHLY_WEIGHTS.iter().sum();
        let hourly_weight_total: f64 = HOURLY_WEIGHTS.iter().sum();

        let mut hourly_values = Vec::with_capacity(8760);
        let mut monthly_values = Vec::with_capacity(12);
        for (month, weight) in MONTHLY_WEIGHTS.iter().enumerate() {
            let month_kwh = annual_kwh * weight / monthly_weight_total;
            monthly_values.push(month_kwh.round() as u32);

            let days = DAYS_PER_MONTH[month];
            let daily_wh = month_kwh * 1000.0 / days as f64;
            for _ in 0..days {
                for hour_weight in &HOURLY_WEIGHTS {
                    let wh = daily_wh * hour_weight / hourly_weight_total;
                    hourly_values.push(wh.round() as u32);
                }
            }
        }

        Ok(ConsumptionPull {
            pdl: pdl.to_string(),
            hourly_values,
            monthly_values,
            synced_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltaflow::tracking::{
        DossierId, DossierType, OrderStatus, PaymentStatus, ShippingAddress,
    };

    fn shipping_address() -> ShippingAddress {
        ShippingAddress {
            first_name: "Claire".to_string(),
            last_name: "Durand".to_string(),
            email: "claire@example.org".to_string(),
            phone: "+33600000000".to_string(),
            address_line1: "12 rue des Lilas".to_string(),
            address_line2: None,
            postal_code: "31000".to_string(),
            city: "Toulouse".to_string(),
            country: None,
        }
    }

    #[tokio::test]
    async fn pull_is_deterministic_for_a_given_pdl() {
        let gateway = SimulatedEnedisGateway::new();
        let consent_id = ConsentId("cons-1".to_string());
        let first = gateway
            .pull_consumption(&consent_id, "12345678901234")
            .await
            .expect("pull succeeds");
        let second = gateway
            .pull_consumption(&consent_id, "12345678901234")
            .await
            .expect("pull succeeds");

        assert_eq!(first.hourly_values, second.hourly_values);
        assert_eq!(first.monthly_values, second.monthly_values);
        assert_eq!(first.hourly_values.len(), 8760);
        assert_eq!(first.monthly_values.len(), 12);
    }

    #[tokio::test]
    async fn winter_months_consume_more_than_summer_months() {
        let gateway = SimulatedEnedisGateway::new();
        let pull = gateway
            .pull_consumption(&ConsentId("cons-1".to_string()), "12345678901234")
            .await
            .expect("pull succeeds");
        assert!(pull.monthly_values[0] > pull.monthly_values[6]);
    }

    #[tokio::test]
    async fn reserved_prefixes_map_to_upstream_failures() {
        let gateway = SimulatedEnedisGateway::new();
        let consent_id = ConsentId("cons-1".to_string());

        let unavailable = gateway.pull_consumption(&consent_id, "99000000000000").await;
        assert!(matches!(unavailable, Err(ConsentApiError::Unavailable(_))));

        let absent = gateway.pull_consumption(&consent_id, "00000000000001").await;
        assert!(matches!(absent, Err(ConsentApiError::DataNotFound(_))));
    }

    #[test]
    fn store_rejects_stale_dossier_writes() {
        let store = InMemoryTrackingStore::default();
        let order_id = OrderId("ord-000001".to_string());
        let dossier = Dossier::new(
            DossierId("dos-000001".to_string()),
            order_id.clone(),
            DossierType::Shipping,
            Utc::now(),
        );
        let order = Order {
            order_id: order_id.clone(),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            total_amount_cents: 1_000_000,
            payment_status: PaymentStatus::Paid,
            shipping_address: shipping_address(),
            items: Vec::new(),
        };
        store
            .insert_order(OrderRecord {
                order,
                dossiers: vec![dossier.clone()],
            })
            .expect("insert succeeds");

        let mut advanced = dossier.clone();
        advanced.version = 1;
        let stale = store.update_dossier(advanced, 7);
        assert!(matches!(
            stale,
            Err(RepositoryError::VersionConflict {
                expected: 7,
                actual: 0
            })
        ));
    }
}
