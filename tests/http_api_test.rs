mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn health_endpoints_respond() {
    let app = TestApp::new().await;

    let (status, body) = app.request_json(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");

    let (status, body) = app.request_json(Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn movement_then_stock_lookup() {
    let app = TestApp::new().await;
    let product = app.create_product("Gloves").await;
    let location = app.create_location("Main").await;
    app.create_user("Juan Perez").await;

    let (status, movement) = app
        .request_json(
            Method::POST,
            "/movements",
            Some(json!({
                "product_id": product,
                "location_id": location,
                "movement_type": "inbound",
                "quantity": 9,
                "storekeeper": "Juan Perez",
                "reference": "initial count"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(movement["resulting_stock"], 9);
    assert!(movement["storekeeper_id"].is_string());

    let (status, level) = app
        .request_json(
            Method::GET,
            &format!("/stock/{}/{}", product, location),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(level["stock"], 9);

    let (status, history) = app
        .request_json(
            Method::GET,
            &format!("/stock/{}/{}/movements?limit=5", product, location),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn errors_carry_stable_codes() {
    let app = TestApp::new().await;
    let product = app.create_product("Gloves").await;
    let location = app.create_location("Main").await;

    let (status, body) = app
        .request_json(
            Method::GET,
            &format!("/stock/{}/{}", product, location),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body) = app
        .request_json(
            Method::POST,
            "/movements",
            Some(json!({
                "product_id": product,
                "location_id": location,
                "movement_type": "outbound",
                "quantity": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_stock");

    let (status, body) = app
        .request_json(
            Method::POST,
            "/movements",
            Some(json!({
                "product_id": product,
                "location_id": location,
                "movement_type": "inbound",
                "quantity": 0
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_quantity");

    let (status, body) = app
        .request_json(
            Method::POST,
            "/movements",
            Some(json!({
                "product_id": product,
                "location_id": location,
                "movement_type": "inbound",
                "quantity": 1,
                "storekeeper": "Nobody Known"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn request_lifecycle_over_http() {
    let app = TestApp::new().await;
    let product = app.create_product("Masks").await;
    let location = app.create_location("Main").await;
    app.stock(product, location, 6).await;

    let (status, created) = app
        .request_json(
            Method::POST,
            "/requests",
            Some(json!({
                "location_id": location,
                "items": [{ "product_id": product, "quantity": 10 }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    let request_id = created["id"].as_str().expect("request id").to_string();

    let (status, outcome) = app
        .request_json(
            Method::POST,
            &format!("/requests/{}/approve", request_id),
            Some(json!({ "note": "urgent" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "partially_approved");
    assert_eq!(outcome["items"][0]["approved_quantity"], 6);
    assert_eq!(outcome["items"][0]["resulting_stock"], 0);

    let (status, body) = app
        .request_json(
            Method::POST,
            &format!("/requests/{}/reject", request_id),
            Some(json!({ "reason": "late" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_processed");

    let (status, completed) = app
        .request_json(
            Method::POST,
            &format!("/requests/{}/complete", request_id),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["status"], "completed");

    let (status, details) = app
        .request_json(Method::GET, &format!("/requests/{}", request_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["status"], "completed");
    assert_eq!(details["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(details["items"][0]["quantity"], 10);
    assert_eq!(details["items"][0]["current_stock"], 0);

    let (status, alerts) = app
        .request_json(Method::GET, "/alerts/low-stock", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alerts.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn reject_over_http() {
    let app = TestApp::new().await;
    let product = app.create_product("Masks").await;
    let location = app.create_location("Main").await;
    let request_id = app.create_request(location, &[(product, 1)]).await;

    let (status, rejected) = app
        .request_json(
            Method::POST,
            &format!("/requests/{}/reject", request_id),
            Some(json!({ "reason": "not needed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["rejection_reason"], "not needed");

    let (status, body) = app
        .request_json(
            Method::POST,
            &format!("/requests/{}/approve", Uuid::new_v4()),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn action_routes_accept_an_empty_body() {
    let app = TestApp::new().await;
    let product = app.create_product("Tape").await;
    let location = app.create_location("Main").await;
    app.stock(product, location, 5).await;
    let request_id = app.create_request(location, &[(product, 2)]).await;

    let (status, body) = app
        .request_json(
            Method::POST,
            &format!("/requests/{}/approve", request_id),
            Some(json!({ "note": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, outcome) = app
        .request_json(Method::POST, &format!("/requests/{}/approve", request_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "approved");

    let (status, completed) = app
        .request_json(Method::POST, &format!("/requests/{}/complete", request_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["status"], "completed");

    let (status, body) = app
        .request_json(Method::POST, &format!("/requests/{}/reject", request_id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_processed");
}

#[tokio::test]
async fn batch_over_http_is_all_or_nothing() {
    let app = TestApp::new().await;
    let a = app.create_product("A").await;
    let b = app.create_product("B").await;
    let location = app.create_location("Main").await;
    app.stock(b, location, 1).await;

    let (status, body) = app
        .request_json(
            Method::POST,
            "/movements/batch",
            Some(json!({
                "movements": [
                    { "product_id": a, "location_id": location, "movement_type": "inbound", "quantity": 4 },
                    { "product_id": b, "location_id": location, "movement_type": "outbound", "quantity": 2 }
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_stock");

    let (status, _) = app
        .request_json(Method::GET, &format!("/stock/{}/{}", a, location), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .request_json(Method::POST, "/movements/batch", Some(json!({ "movements": [] })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, result) = app
        .request_json(
            Method::POST,
            "/movements/batch",
            Some(json!({
                "movements": [
                    { "product_id": a, "location_id": location, "movement_type": "inbound", "quantity": 4 },
                    { "product_id": b, "location_id": location, "movement_type": "outbound", "quantity": 1 }
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["applied_count"], 2);
    assert_eq!(result["deltas"][1]["delta"], -1);
}

#[tokio::test]
async fn reservations_over_http() {
    let app = TestApp::new().await;
    let product = app.create_product("Lamp").await;
    let location = app.create_location("Main").await;
    app.stock(product, location, 5).await;
    let request_id = app.create_request(location, &[(product, 2)]).await;

    let (status, reservation) = app
        .request_json(
            Method::POST,
            &format!("/products/{}/reserve", product),
            Some(json!({
                "location_id": location,
                "quantity": 2,
                "request_id": request_id
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reservation["status"], "active");
    assert_eq!(reservation["available_after"], 3);

    let (status, listed) = app
        .request_json(
            Method::GET,
            &format!("/requests/{}/reservations", request_id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, released) = app
        .request_json(
            Method::DELETE,
            &format!("/products/{}/reserve?request_id={}", product, request_id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(released["released"], 1);

    let (status, body) = app
        .request_json(
            Method::DELETE,
            &format!("/products/{}/reserve?request_id={}", product, request_id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn minimum_stock_and_low_stock_listing_over_http() {
    let app = TestApp::new().await;
    let product = app.create_product("Filter").await;
    let location = app.create_location("Main").await;
    app.stock(product, location, 2).await;

    let (status, level) = app
        .request_json(
            Method::PUT,
            &format!("/stock/{}/{}/minimum", product, location),
            Some(json!({ "minimum_stock": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(level["minimum_stock"], 5);

    let (status, alerts) = app
        .request_json(Method::GET, "/alerts/low-stock", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alerts[0]["product_id"], json!(product));
}
