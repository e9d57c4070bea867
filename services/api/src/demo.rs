use crate::infra::{InMemoryTrackingStore, SimulatedEnedisGateway};
use clap::Args;
use std::sync::Arc;
use voltaflow::error::AppError;
use voltaflow::tracking::{
    Actor, ConsentRequestInput, ConsentSyncManager, ConsuelStatus, DocumentKind, Dossier,
    DossierStatus, DossierType, EnedisStatus, InstallationStatus, LineItem, NewDocument, NewOrder,
    OrderId, OrderStatus, PaymentStatus, ShippingAddress, ShippingStatus, TechnicalVisitForm,
    TrackingService,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// PDL (meter point) used for the Enedis consent demo. Prefixes 00 and
    /// 99 trigger the simulated failure modes.
    #[arg(long)]
    pub(crate) pdl: Option<String>,
    /// Skip the Enedis consent portion of the demo.
    #[arg(long)]
    pub(crate) skip_consent: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let pdl = args.pdl.unwrap_or_else(|| "12345678901234".to_string());
    let admin = Actor::admin("demo-admin");

    let store = Arc::new(InMemoryTrackingStore::default());
    let service = Arc::new(TrackingService::new(store));
    let gateway = Arc::new(SimulatedEnedisGateway::new());
    let consent_manager = ConsentSyncManager::new(service.clone(), gateway);

    println!("Installation order tracking demo");

    let record = service.create_order(demo_order(), &admin)?;
    let order_id = record.order.order_id.clone();
    println!(
        "Created order {} ({} cents, payment {:?})",
        order_id.0, record.order.total_amount_cents, record.order.payment_status
    );
    for dossier in &record.dossiers {
        println!(
            "- dossier {} | {} | {}",
            dossier.dossier_id.0,
            dossier.dossier_type().label(),
            dossier.status.label()
        );
    }

    service.change_order_status(&order_id, OrderStatus::Confirmed, &admin)?;
    service.change_order_status(&order_id, OrderStatus::Validated, &admin)?;
    println!("\nOrder confirmed and validated");

    let shipping = dossier_of(&service, &order_id, DossierType::Shipping)?;
    service.apply_dossier_transition(
        &order_id,
        &shipping.dossier_id,
        DossierStatus::Shipping(ShippingStatus::Shipped),
        &admin,
        shipping.version,
        None,
    )?;
    service.change_order_status(&order_id, OrderStatus::Shipped, &admin)?;
    let shipping = dossier_of(&service, &order_id, DossierType::Shipping)?;
    service.apply_dossier_transition(
        &order_id,
        &shipping.dossier_id,
        DossierStatus::Shipping(ShippingStatus::Delivered),
        &admin,
        shipping.version,
        None,
    )?;
    println!("Shipping dossier delivered");

    let installation = dossier_of(&service, &order_id, DossierType::Installation)?;
    for index in 1..=3 {
        service.attach_document(
            &order_id,
            &installation.dossier_id,
            NewDocument {
                kind: DocumentKind::Photo,
                file_name: format!("site-{index}.jpg"),
                content_type: "image/jpeg".to_string(),
                storage_key: format!("blob://demo/site-{index}.jpg"),
            },
            &admin,
        )?;
    }
    let form = TechnicalVisitForm {
        roof_type: Some("sloped_tiles".to_string()),
        mounting_height: Some(5.5),
        electrical_distance: Some("30-60m".to_string()),
        obstacles: Some(vec!["chimney".to_string()]),
        comments: Some("south-facing roof, clear access".to_string()),
        photo_ids: Some(vec![
            "site-1".to_string(),
            "site-2".to_string(),
            "site-3".to_string(),
        ]),
    };
    let installation = dossier_of(&service, &order_id, DossierType::Installation)?;
    service.apply_dossier_transition(
        &order_id,
        &installation.dossier_id,
        DossierStatus::Installation(InstallationStatus::SiteVisitCompleted),
        &admin,
        installation.version,
        Some(&form),
    )?;
    let installation = dossier_of(&service, &order_id, DossierType::Installation)?;
    service.apply_dossier_transition(
        &order_id,
        &installation.dossier_id,
        DossierStatus::Installation(InstallationStatus::Scheduled),
        &admin,
        installation.version,
        None,
    )?;
    let installation = dossier_of(&service, &order_id, DossierType::Installation)?;
    service.apply_dossier_transition(
        &order_id,
        &installation.dossier_id,
        DossierStatus::Installation(InstallationStatus::Installed),
        &admin,
        installation.version,
        None,
    )?;
    println!("Installation completed, technical visit form on file with 3 photos");

    if !args.skip_consent {
        println!("\nEnedis consent lifecycle (PDL {pdl})");
        let enedis = dossier_of(&service, &order_id, DossierType::AdminEnedis)?;
        match consent_manager
            .request_consent(
                &order_id,
                &enedis.dossier_id,
                ConsentRequestInput {
                    pdl: pdl.clone(),
                    last_name: "Durand".to_string(),
                    address: "12 rue des Lilas, 31000 Toulouse".to_string(),
                },
            )
            .await
        {
            Ok(consent) => {
                println!(
                    "- consent {} requested, status {}",
                    consent.consent_id.0,
                    consent.status.label()
                );
                let consent = consent_manager
                    .activate_consent(&consent.consent_id, chrono::Utc::now())?;
                println!("- consent activated on {:?}", consent.consent_date);

                match consent_manager
                    .sync_consumption(&consent.consent_id, chrono::Utc::now())
                    .await
                {
                    Ok(range) => {
                        println!(
                            "- pulled {} hourly records covering {} -> {}",
                            range.record_count, range.start, range.end
                        );
                        let enedis = dossier_of(&service, &order_id, DossierType::AdminEnedis)?;
                        service.apply_dossier_transition(
                            &order_id,
                            &enedis.dossier_id,
                            DossierStatus::AdminEnedis(EnedisStatus::Completed),
                            &admin,
                            enedis.version,
                            None,
                        )?;
                        println!("- Enedis dossier completed");
                    }
                    Err(err) => println!("- consumption pull failed: {err}"),
                }
            }
            Err(err) => println!("- consent request failed: {err}"),
        }
    }

    let consuel = dossier_of(&service, &order_id, DossierType::AdminConsuel)?;
    service.apply_dossier_transition(
        &order_id,
        &consuel.dossier_id,
        DossierStatus::AdminConsuel(ConsuelStatus::Submitted),
        &admin,
        consuel.version,
        None,
    )?;
    let consuel = dossier_of(&service, &order_id, DossierType::AdminConsuel)?;
    service.apply_dossier_transition(
        &order_id,
        &consuel.dossier_id,
        DossierStatus::AdminConsuel(ConsuelStatus::Approved),
        &admin,
        consuel.version,
        None,
    )?;
    println!("\nConsuel certification approved");

    service.change_order_status(&order_id, OrderStatus::Delivered, &admin)?;
    service.add_note(
        &order_id,
        None,
        "All dossiers closed out, customer notified.",
        &admin,
    )?;

    let record = service.order(&order_id)?;
    println!("\nFinal state: order {} is {}", order_id.0, record.order.status.label());
    for dossier in &record.dossiers {
        println!(
            "- {} | {} | version {} | {} document(s)",
            dossier.dossier_type().label(),
            dossier.status.label(),
            dossier.version,
            dossier.documents.len()
        );
        for event in service.dossier_events(&dossier.dossier_id) {
            let from = event
                .from_status
                .map(|status| status.label())
                .unwrap_or("(created)");
            println!(
                "    {} -> {} by {} at {}",
                from,
                event.to_status.label(),
                event.actor.id,
                event.timestamp
            );
        }
    }
    for note in service.notes(&order_id) {
        println!("Note by {}: {}", note.created_by, note.content);
    }

    Ok(())
}

fn dossier_of(
    service: &TrackingService<InMemoryTrackingStore>,
    order_id: &OrderId,
    dossier_type: DossierType,
) -> Result<Dossier, AppError> {
    let record = service.order(order_id)?;
    record
        .dossiers
        .into_iter()
        .find(|dossier| dossier.dossier_type() == dossier_type)
        .ok_or_else(|| {
            AppError::Tracking(voltaflow::tracking::TrackingError::NotFound("dossier"))
        })
}

fn demo_order() -> NewOrder {
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
        items: vec![LineItem {
            product_id: "kit-solar-6kw".to_string(),
            name: "6 kWc rooftop solar kit".to_string(),
            quantity: 1,
            unit_price_cents: 1_249_000,
            power_kwc: Some(6.0),
        }],
        dossier_types: DossierType::ordered().to_vec(),
    }
}
