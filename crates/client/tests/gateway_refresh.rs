//! Gateway refresh behavior: single-flight, replay, and session-fatal
//! cascades.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use common::{MockPrompt, MockTransport, ok_json, seed_session, status_only, test_client};
use tablefare_client::api::{ApiRequest, ApiResponse};

const REFRESH_PATH: &str = "/auth/refresh-token";
const ORDERS_PATH: &str = "/orders";

fn refresh_counting_transport(
    refresh_calls: Arc<AtomicUsize>,
    barrier: Arc<tokio::sync::Barrier>,
    refresh_succeeds: bool,
) -> MockTransport {
    MockTransport::new(move |request: ApiRequest| {
        let refresh_calls = Arc::clone(&refresh_calls);
        let barrier = Arc::clone(&barrier);
        async move {
            match request.path.as_str() {
                REFRESH_PATH => {
                    refresh_calls.fetch_add(1, Ordering::SeqCst);
                    if refresh_succeeds {
                        ok_json(json!({"accessToken": "fresh", "refreshToken": "r2"}))
                    } else {
                        status_only(401)
                    }
                }
                ORDERS_PATH => {
                    if request.bearer.as_deref() == Some("fresh") {
                        ok_json(json!({"orders": []}))
                    } else {
                        // Hold every stale-token request until all have
                        // arrived, so the 401s land in the same expiry
                        // episode.
                        barrier.wait().await;
                        status_only(401)
                    }
                }
                other => panic!("unexpected path: {other}"),
            }
        }
    })
}

#[tokio::test]
async fn concurrent_401s_collapse_into_one_refresh() {
    const CONCURRENT: usize = 5;

    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(tokio::sync::Barrier::new(CONCURRENT));
    let transport =
        refresh_counting_transport(Arc::clone(&refresh_calls), barrier, true);

    let (client, _storage) = test_client(transport.clone(), MockPrompt::cancelled());
    seed_session(client.credentials());

    let orders = client.orders();
    let results = tokio::join!(
        orders.recent_orders(),
        orders.recent_orders(),
        orders.recent_orders(),
        orders.recent_orders(),
        orders.recent_orders(),
    );

    // Every request resolved, all after the same single refresh
    let all = [results.0, results.1, results.2, results.3, results.4];
    for result in all {
        assert!(result.expect("request should succeed after replay").is_empty());
    }
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);

    // The rotated pair landed in the store atomically
    assert_eq!(
        client.credentials().access_token().as_deref(),
        Some("fresh")
    );
    assert_eq!(client.credentials().refresh_token().as_deref(), Some("r2"));
}

#[tokio::test]
async fn failed_refresh_expires_every_waiter_with_one_call() {
    const CONCURRENT: usize = 3;

    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(tokio::sync::Barrier::new(CONCURRENT));
    let transport =
        refresh_counting_transport(Arc::clone(&refresh_calls), barrier, false);

    let (client, _storage) = test_client(transport, MockPrompt::cancelled());
    seed_session(client.credentials());

    let orders = client.orders();
    let results = tokio::join!(
        orders.recent_orders(),
        orders.recent_orders(),
        orders.recent_orders(),
    );

    for result in [results.0, results.1, results.2] {
        let err = result.expect_err("session should be expired");
        assert!(err.is_session_expired(), "got {err}");
    }
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);

    // Store is clean; the UI layer redirects to login from here
    assert!(!client.credentials().is_authenticated());
}

#[tokio::test]
async fn second_401_after_replay_is_session_fatal_without_another_refresh() {
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let transport = MockTransport::new({
        let refresh_calls = Arc::clone(&refresh_calls);
        move |request: ApiRequest| {
            let refresh_calls = Arc::clone(&refresh_calls);
            async move {
                match request.path.as_str() {
                    REFRESH_PATH => {
                        refresh_calls.fetch_add(1, Ordering::SeqCst);
                        ok_json(json!({"accessToken": "fresh", "refreshToken": "r2"}))
                    }
                    // Misbehaving backend: rejects even the fresh token
                    ORDERS_PATH => status_only(401),
                    other => panic!("unexpected path: {other}"),
                }
            }
        }
    });

    let (client, _storage) = test_client(transport, MockPrompt::cancelled());
    seed_session(client.credentials());

    let err = client
        .orders()
        .recent_orders()
        .await
        .expect_err("should expire");
    assert!(err.is_session_expired());

    // No refresh loop: exactly one refresh, then surrender
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    assert!(!client.credentials().is_authenticated());
}

#[tokio::test]
async fn non_401_errors_pass_through_untouched() {
    let transport = MockTransport::new(|request: ApiRequest| async move {
        match request.path.as_str() {
            ORDERS_PATH => Ok(ApiResponse {
                status: 500,
                body: "kitchen on fire".into(),
            }),
            other => panic!("unexpected path: {other}"),
        }
    });

    let (client, _storage) = test_client(transport.clone(), MockPrompt::cancelled());
    seed_session(client.credentials());

    let err = client
        .orders()
        .recent_orders()
        .await
        .expect_err("500 should surface");
    match err {
        tablefare_client::ApiError::Status { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "kitchen on fire");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Not retried, no refresh attempted, session untouched
    assert_eq!(transport.count_path(ORDERS_PATH), 1);
    assert_eq!(transport.count_path(REFRESH_PATH), 0);
    assert!(client.credentials().is_authenticated());
}

#[tokio::test]
async fn login_rejection_does_not_trigger_refresh() {
    let transport = MockTransport::new(|request: ApiRequest| async move {
        match request.path.as_str() {
            "/auth/login" => status_only(401),
            other => panic!("unexpected path: {other}"),
        }
    });

    let (client, _storage) = test_client(transport.clone(), MockPrompt::cancelled());

    let email = tablefare_core::Email::parse("diner@example.com").expect("valid email");
    let err = client
        .auth()
        .login(&email, "wrong-password")
        .await
        .expect_err("bad credentials");

    // A login 401 is bad credentials, not an expired session
    assert!(matches!(
        err,
        tablefare_client::ApiError::Status { status: 401, .. }
    ));
    assert_eq!(transport.count_path(REFRESH_PATH), 0);
    assert!(!client.credentials().is_authenticated());
}

#[tokio::test]
async fn login_success_stores_session() {
    let transport = MockTransport::new(|request: ApiRequest| async move {
        match request.path.as_str() {
            "/auth/login" => ok_json(json!({
                "accessToken": "acc",
                "refreshToken": "ref",
                "user": {"id": "u42", "roles": ["customer"]},
            })),
            other => panic!("unexpected path: {other}"),
        }
    });

    let (client, _storage) = test_client(transport, MockPrompt::cancelled());

    let email = tablefare_core::Email::parse("diner@example.com").expect("valid email");
    let mut auth_rx = client.watch_authenticated();
    let user = client
        .auth()
        .login(&email, "hunter2!")
        .await
        .expect("login should succeed");

    assert_eq!(user.id, tablefare_core::UserId::new("u42"));
    assert!(client.is_authenticated());
    assert!(auth_rx.has_changed().expect("watch alive"));
    assert!(*auth_rx.borrow_and_update());
}
