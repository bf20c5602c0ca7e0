mod common;

use common::{ScriptedTransport, context};
use hostman_provision::hostman_transport::Method;
use hostman_provision::{PollConfig, ReconcileError, Reconciler, ResourceId, ServerReconciler, ServerRecord};
use serde_json::json;

fn reconciler() -> ServerReconciler {
    ServerReconciler::new(PollConfig::from_millis(5_000, 1_800_000))
}

fn created_server(transport: &ScriptedTransport) {
    transport.reply(
        Method::POST,
        "/servers",
        json!({"server": {"id": 101.0, "name": "web", "status": "installing"}}),
    );
}

#[tokio::test(start_paused = true)]
async fn create_sends_minimal_payload_and_waits_for_root_password() {
    let transport = ScriptedTransport::new();
    created_server(&transport);
    transport.reply(Method::GET, "/servers/101", json!({"server": {"id": 101, "status": "installing"}}));
    transport.reply(
        Method::GET,
        "/servers/101",
        json!({"server": {"id": 101, "status": "installing", "root_pass": ""}}),
    );
    transport.reply(
        Method::GET,
        "/servers/101",
        json!({"server": {
            "id": 101, "name": "web", "bandwidth": 200.0, "is_ddos_guard": false,
            "status": "on", "root_pass": "s3cret", "availability_zone": "ams-1"
        }}),
    );

    let mut record = ServerRecord::new("web", 200, false);
    let outcome = reconciler().create(&context(&transport), &mut record).await;

    assert!(outcome.is_ok(), "{outcome:?}");
    assert_eq!(
        transport.single_body(&Method::POST, "/servers"),
        json!({"name": "web", "bandwidth": 200, "is_ddos_guard": false})
    );
    // Three polls until the password shows up, then the final read.
    assert_eq!(transport.count(&Method::GET, "/servers/101"), 4);
    assert_eq!(record.id, ResourceId::new("101"));
    assert_eq!(record.root_pass.as_ref().map(|p| p.expose().as_str()), Some("s3cret"));
    assert_eq!(record.status.as_deref(), Some("on"));
    assert!(!format!("{record:?}").contains("s3cret"));
    assert!(transport.calls().iter().all(|c| c.token == common::TOKEN));
}

#[tokio::test(start_paused = true)]
async fn create_timeout_keeps_the_assigned_id() {
    let transport = ScriptedTransport::new();
    created_server(&transport);
    transport.reply(Method::GET, "/servers/101", json!({"server": {"id": 101, "status": "installing"}}));

    let mut record = ServerRecord::new("web", 200, false);
    let reconciler = ServerReconciler::new(PollConfig::from_millis(5_000, 20_000));
    let outcome = reconciler.create(&context(&transport), &mut record).await;

    assert!(matches!(outcome, Err(ref e) if e.is_timeout()), "{outcome:?}");
    assert_eq!(record.id.as_str(), "101");
    assert_eq!(record.root_pass, None);
    // Reads at 0s, 5s, 10s, 15s and 20s, then the deadline stops the loop.
    assert_eq!(transport.count(&Method::GET, "/servers/101"), 5);
}

#[tokio::test]
async fn invalid_record_makes_no_call() {
    let transport = ScriptedTransport::new();
    let mut record = ServerRecord::new("web", 0, false);

    let outcome = reconciler().create(&context(&transport), &mut record).await;

    assert!(matches!(outcome, Err(ReconcileError::Validation { .. })));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn update_without_changes_only_reads() {
    let transport = ScriptedTransport::new();
    transport.reply(Method::GET, "/servers/101", json!({"server": {"id": 101, "name": "web"}}));

    let prior = ServerRecord {
        id: ResourceId::new("101"),
        ..ServerRecord::new("web", 200, false)
    };
    let mut desired = ServerRecord {
        id: ResourceId::default(),
        ..prior.clone()
    };

    let outcome = reconciler().update(&context(&transport), &prior, &mut desired).await;

    assert!(outcome.is_ok(), "{outcome:?}");
    assert_eq!(transport.count(&Method::PATCH, "/servers/101"), 0);
    assert_eq!(transport.count(&Method::GET, "/servers/101"), 1);
    assert_eq!(desired.id.as_str(), "101");
}

#[tokio::test]
async fn update_patches_exactly_the_changed_fields() {
    let transport = ScriptedTransport::new();
    transport.reply(Method::PATCH, "/servers/101", json!({"server": {"id": 101}}));
    transport.reply(Method::GET, "/servers/101", json!({"server": {"id": 101, "bandwidth": 300}}));

    let prior = ServerRecord {
        id: ResourceId::new("101"),
        ..ServerRecord::new("web", 200, false)
    };
    let mut desired = ServerRecord {
        bandwidth: 300,
        ..prior.clone()
    };

    let outcome = reconciler().update(&context(&transport), &prior, &mut desired).await;

    assert!(outcome.is_ok(), "{outcome:?}");
    assert_eq!(transport.single_body(&Method::PATCH, "/servers/101"), json!({"bandwidth": 300}));
    assert_eq!(desired.bandwidth, 300);
}

#[tokio::test]
async fn read_of_a_vanished_server_is_not_found() {
    let transport = ScriptedTransport::new();
    transport.fail(Method::GET, "/servers/101", 404, r#"{"message":"not found"}"#);

    let mut record = ServerRecord {
        id: ResourceId::new("101"),
        ..ServerRecord::new("web", 200, false)
    };
    let outcome = reconciler().read(&context(&transport), &mut record).await;

    assert!(matches!(outcome, Err(ref e) if e.is_not_found()), "{outcome:?}");
}

#[tokio::test]
async fn delete_clears_the_id() {
    let transport = ScriptedTransport::new();
    transport.reply_text(Method::DELETE, "/servers/101", "");

    let mut record = ServerRecord {
        id: ResourceId::new("101"),
        ..ServerRecord::new("web", 200, false)
    };
    let outcome = reconciler().delete(&context(&transport), &mut record).await;

    assert!(outcome.is_ok(), "{outcome:?}");
    assert!(record.id.is_empty());
    assert_eq!(transport.count(&Method::DELETE, "/servers/101"), 1);
}

#[tokio::test]
async fn failed_delete_keeps_the_id() {
    let transport = ScriptedTransport::new();
    transport.fail(Method::DELETE, "/servers/101", 500, "boom");

    let mut record = ServerRecord {
        id: ResourceId::new("101"),
        ..ServerRecord::new("web", 200, false)
    };
    let outcome = reconciler().delete(&context(&transport), &mut record).await;

    assert!(matches!(outcome, Err(ReconcileError::Api { status: 500, .. })));
    assert_eq!(record.id.as_str(), "101");
}
