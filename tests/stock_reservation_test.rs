mod common;

use assert_matches::assert_matches;
use common::TestApp;
use inventory_ledger::entities::stock_reservation::ReservationStatus;
use inventory_ledger::errors::ServiceError;
use inventory_ledger::services::stock_reservation::ReserveStock;
use uuid::Uuid;

fn reserve(product_id: Uuid, location_id: Uuid, request_id: Uuid, quantity: i32) -> ReserveStock {
    ReserveStock {
        product_id,
        location_id,
        quantity,
        request_id,
        reason: None,
    }
}

#[tokio::test]
async fn reserving_leaves_stock_untouched() {
    let app = TestApp::new().await;
    let product = app.create_product("Lamp").await;
    let location = app.create_location("Store").await;
    app.stock(product, location, 10).await;
    let request_id = app.create_request(location, &[(product, 4)]).await;

    let receipt = app
        .engine()
        .reserve_stock(reserve(product, location, request_id, 4))
        .await
        .unwrap();
    assert_eq!(receipt.available_after, 6);

    let reservation = receipt.reservation;
    assert_eq!(reservation.status, ReservationStatus::Active.as_str());
    assert_eq!(reservation.reason, "Automatic reservation");
    assert_eq!(reservation.released_at, None);
    assert_eq!(app.stock_of(product, location).await, 10);
}

#[tokio::test]
async fn reservations_do_not_consult_each_other() {
    let app = TestApp::new().await;
    let product = app.create_product("Lamp").await;
    let location = app.create_location("Store").await;
    app.stock(product, location, 10).await;
    let first = app.create_request(location, &[(product, 8)]).await;
    let second = app.create_request(location, &[(product, 8)]).await;

    app.engine()
        .reserve_stock(reserve(product, location, first, 8))
        .await
        .unwrap();
    app.engine()
        .reserve_stock(reserve(product, location, second, 8))
        .await
        .unwrap();

    // Approval ignores holds as well.
    let outcome = app
        .engine()
        .approve_request(second, None, None)
        .await
        .unwrap();
    assert_eq!(outcome.items[0].approved_quantity, 8);
}

#[tokio::test]
async fn reserve_checks_stock_row_and_quantity() {
    let app = TestApp::new().await;
    let product = app.create_product("Lamp").await;
    let location = app.create_location("Store").await;
    let request_id = app.create_request(location, &[(product, 1)]).await;

    assert_matches!(
        app.engine()
            .reserve_stock(reserve(product, location, request_id, 1))
            .await,
        Err(ServiceError::NotFound(_))
    );

    app.stock(product, location, 3).await;
    assert_matches!(
        app.engine()
            .reserve_stock(reserve(product, location, request_id, 4))
            .await,
        Err(ServiceError::InsufficientStock { available: 3, requested: 4, .. })
    );
    assert_matches!(
        app.engine()
            .reserve_stock(reserve(product, location, request_id, 0))
            .await,
        Err(ServiceError::InvalidQuantity(0))
    );
}

#[tokio::test]
async fn release_marks_active_holds_released() {
    let app = TestApp::new().await;
    let product = app.create_product("Lamp").await;
    let location = app.create_location("Store").await;
    app.stock(product, location, 10).await;
    let request_id = app.create_request(location, &[(product, 2)]).await;

    let mut input = reserve(product, location, request_id, 2);
    input.reason = Some("event setup".into());
    app.engine().reserve_stock(input).await.unwrap();
    app.engine()
        .reserve_stock(reserve(product, location, request_id, 1))
        .await
        .unwrap();

    let released = app
        .engine()
        .release_reservation(product, request_id)
        .await
        .unwrap();
    assert_eq!(released, 2);

    let holds = app
        .engine()
        .reservations
        .list_for_request(request_id)
        .await
        .unwrap();
    assert_eq!(holds.len(), 2);
    assert!(holds
        .iter()
        .all(|h| h.status == "released" && h.released_at.is_some()));
    assert!(holds.iter().any(|h| h.reason == "event setup"));

    assert_matches!(
        app.engine().release_reservation(product, request_id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(app.stock_of(product, location).await, 10);
}
