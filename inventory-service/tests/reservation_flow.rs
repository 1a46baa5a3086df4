use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;
use inventory_service::coordinator::{ReserveItem, ReserveRequest};
use inventory_service::store::{InventoryStore, MemoryInventoryStore};
use inventory_service::{ReservationCoordinator, ReservationSettings};
use shared::InventoryEvent;
use uuid::Uuid;

fn request(items: &[(Uuid, i32)]) -> ReserveRequest {
    ReserveRequest {
        items: items
            .iter()
            .map(|(product_id, quantity)| ReserveItem {
                product_id: *product_id,
                quantity: *quantity,
            })
            .collect(),
        reserved_by: Some("order-service".to_string()),
        reference_id: Some("order-1".to_string()),
        ..Default::default()
    }
}

fn setup() -> (Arc<MemoryInventoryStore>, Arc<ReservationCoordinator>) {
    let store = Arc::new(MemoryInventoryStore::new());
    let coordinator = Arc::new(ReservationCoordinator::new(store.clone(), ReservationSettings::default()));
    (store, coordinator)
}

#[tokio::test]
async fn reserve_release_round_trip_restores_ledger() {
    let (store, coordinator) = setup();
    let a = store.add_product("a", 9).await;
    let b = store.add_product("b", 4).await;
    let before = (store.stock_level(a).await, store.stock_level(b).await);

    let outcome = coordinator.reserve(request(&[(a, 3), (b, 4)])).await.unwrap();
    assert!(outcome.all_reserved);
    assert_eq!(store.stock_level(b).await.unwrap().available, 0);

    assert!(coordinator.release(&outcome.reservation_id).await.unwrap().success);
    assert_eq!((store.stock_level(a).await, store.stock_level(b).await), before);
}

#[tokio::test]
async fn many_concurrent_reservations_respect_total_stock() {
    let (store, coordinator) = setup();
    let p = store.add_product("limited", 10).await;

    let attempts = (0..25).map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.reserve(request(&[(p, 1)])).await })
    });
    let outcomes: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.all_reserved).count(), 10);
    let level = store.stock_level(p).await.unwrap();
    assert_eq!(level.reserved, 10);
    assert_eq!(level.available, 0);
}

#[tokio::test]
async fn concurrent_releases_and_sweeps_settle_each_line_once() {
    let (store, coordinator) = setup();
    let p = store.add_product("p", 6).await;
    let outcome = coordinator.reserve(request(&[(p, 6)])).await.unwrap();

    let later = Utc::now() + Duration::hours(1);
    let (released, swept) = tokio::join!(
        coordinator.release(&outcome.reservation_id),
        coordinator.sweep_expired(later),
    );

    let released = released.unwrap().success;
    let swept = swept.unwrap().lines_expired;
    assert!(released ^ (swept == 1));
    assert_eq!(store.stock_level(p).await.unwrap().reserved, 0);
}

#[tokio::test]
async fn every_state_change_lands_in_the_outbox() {
    let (store, coordinator) = setup();
    let p = store.add_product("p", 5).await;

    let kept = coordinator.reserve(request(&[(p, 1)])).await.unwrap();
    let released = coordinator.reserve(request(&[(p, 1)])).await.unwrap();
    coordinator.release(&released.reservation_id).await.unwrap();
    coordinator.sweep_expired(Utc::now() + Duration::hours(1)).await.unwrap();
    // rejected batches publish nothing
    coordinator.reserve(request(&[(p, 50)])).await.unwrap();

    let events: Vec<InventoryEvent> = store
        .pending_events(100)
        .await
        .unwrap()
        .into_iter()
        .map(|e| serde_json::from_value(e.event_data).unwrap())
        .collect();

    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], InventoryEvent::ReservationCreated { reserved_by: Some(by), .. } if by == "order-service"));
    assert!(matches!(&events[2], InventoryEvent::ReservationReleased { reservation_id, .. } if *reservation_id == released.reservation_id));
    assert!(matches!(&events[3], InventoryEvent::ReservationExpired { reservation_id, .. } if *reservation_id == kept.reservation_id));
}

#[tokio::test]
async fn stock_shrinking_under_a_reservation_is_reported_not_oversold() {
    let (store, coordinator) = setup();
    let p = store.add_product("p", 5).await;
    coordinator.reserve(request(&[(p, 4)])).await.unwrap();

    store.set_total(p, 4).await;
    let outcome = coordinator.reserve(request(&[(p, 1)])).await.unwrap();

    assert!(!outcome.all_reserved);
    assert_eq!(outcome.results[0].message, "Insufficient stock. Available: 0, Requested: 1");
    let level = store.stock_level(p).await.unwrap();
    assert!(level.reserved <= level.total);
}
