use std::sync::Arc;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::json;
use tempfile::{tempdir, TempDir};

use address_mapper_lib::config::EndpointMode;
use address_mapper_lib::{
    AppConfig, AppState, ClearOutcome, RecordingSink, SecretVault, SubmitOutcome, ViewUpdate,
};

const GEOCODER_PATH: &str = "/geocode/V1/geoCoder";
const APP_ID: &str = "test-app-id";

async fn boot(config: AppConfig) -> (AppState, Arc<RecordingSink>, TempDir) {
    let dir = tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let state = AppState::bootstrap(dir.path(), config, SecretVault::in_memory(), sink.clone())
        .await
        .expect("bootstrap");
    (state, sink, dir)
}

fn direct_config(server: &Server) -> AppConfig {
    AppConfig {
        geocoder_endpoint: server.url(GEOCODER_PATH).to_string(),
        ..AppConfig::defaults()
    }
}

fn shibuya_feature() -> serde_json::Value {
    json!({
        "ResultInfo": { "Count": 1 },
        "Feature": [{
            "Name": "東京都渋谷区道玄坂1丁目2-3",
            "Geometry": { "Type": "point", "Coordinates": "139.6993,35.6580" },
            "Property": {
                "Address": "東京都渋谷区道玄坂1丁目2-3",
                "AddressType": "地番・戸番"
            }
        }]
    })
}

#[tokio::test]
async fn search_places_marker_and_rejects_duplicate() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of!(
            request::method_path("GET", GEOCODER_PATH),
            request::query(url_decoded(contains(("appid", APP_ID)))),
            request::query(url_decoded(contains(("output", "json")))),
            request::query(url_decoded(contains((
                "query",
                "東京都渋谷区道玄坂1丁目2番3号"
            )))),
        ))
        .times(1)
        .respond_with(json_encoded(shibuya_feature())),
    );

    let (state, sink, _dir) = boot(direct_config(&server)).await;
    let controller = state.controller();
    controller.save_credential(APP_ID).expect("save key");
    let _map = controller.attach_map();

    let outcome = controller.submit("東京都渋谷区道玄坂1-2-3").await;
    let SubmitOutcome::Added { index, entry } = outcome else {
        panic!("expected marker, got {outcome:?}");
    };
    assert_eq!(index, 0);
    assert_eq!(entry.lat, 35.6580);
    assert_eq!(entry.lon, 139.6993);
    assert_eq!(entry.color, "#FF6B6B");

    // Same address after width and dash folding: no second request.
    let again = controller.submit("東京都渋谷区道玄坂１ー２ー３").await;
    assert!(matches!(again, SubmitOutcome::Duplicate));
    assert_eq!(controller.snapshot().entries.len(), 1);

    let center = controller.center_on(0).expect("center");
    assert_eq!(center.zoom, 18);

    let updates = sink.take();
    assert!(updates
        .iter()
        .any(|u| matches!(u, ViewUpdate::Markers { entries } if entries.len() == 1)));
    assert!(updates
        .iter()
        .any(|u| matches!(u, ViewUpdate::Map(frame) if frame.markers.len() == 1)));
}

#[tokio::test]
async fn not_found_tries_every_candidate_and_keeps_list() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", GEOCODER_PATH))
            .times(2)
            .respond_with(json_encoded(json!({ "ResultInfo": { "Count": 0 } }))),
    );

    let (state, _sink, _dir) = boot(direct_config(&server)).await;
    let controller = state.controller();
    controller.save_credential(APP_ID).unwrap();

    let outcome = controller.submit("架空市1-2").await;
    assert!(
        matches!(outcome, SubmitOutcome::Failed { ref kind, .. } if kind == "not_found"),
        "{outcome:?}"
    );
    assert!(controller.snapshot().entries.is_empty());
}

#[tokio::test]
async fn auth_error_stops_after_first_request() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", GEOCODER_PATH))
            .times(1)
            .respond_with(
                status_code(400).body(
                    json!({ "Error": { "Code": "E01", "Message": "Invalid appid" } })
                        .to_string(),
                ),
            ),
    );

    let (state, _sink, _dir) = boot(direct_config(&server)).await;
    let controller = state.controller();
    controller.save_credential("wrong-key").unwrap();

    let outcome = controller.submit("東京都渋谷区道玄坂1-2-3").await;
    match outcome {
        SubmitOutcome::Failed { kind, message } => {
            assert_eq!(kind, "remote");
            assert!(message.contains("Invalid appid"));
        }
        other => panic!("expected remote failure, got {other:?}"),
    }
    assert!(controller.snapshot().entries.is_empty());
}

#[tokio::test]
async fn blank_key_is_rejected_and_search_needs_a_key() {
    let server = Server::run();
    let (state, _sink, _dir) = boot(direct_config(&server)).await;
    let controller = state.controller();

    assert!(controller.save_credential("   ").is_err());
    let snapshot = controller.snapshot();
    assert!(!snapshot.has_credential);
    assert!(snapshot.credential_status.is_some());

    let outcome = controller.submit("札幌市").await;
    assert!(
        matches!(outcome, SubmitOutcome::Failed { ref kind, .. } if kind == "missing_credential")
    );
}

#[tokio::test]
async fn relay_mode_routes_through_local_relay() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of!(
            request::method_path("GET", GEOCODER_PATH),
            request::query(url_decoded(contains(("results", "5")))),
        ))
        .times(1)
        .respond_with(json_encoded(json!({
            "Feature": [
                { "Name": "渋谷駅", "Geometry": { "Coordinates": "139.7016,35.6580" } },
                { "Name": "渋谷区役所", "Geometry": { "Coordinates": "139.6982,35.6640" } }
            ]
        }))),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method_path("GET", GEOCODER_PATH),
            request::query(url_decoded(contains(("query", "渋谷駅")))),
        ))
        .times(1)
        .respond_with(json_encoded(json!({
            "Feature": [
                { "Name": "渋谷駅", "Geometry": { "Coordinates": "139.7016,35.6580" } }
            ]
        }))),
    );

    let config = AppConfig {
        geocoder_mode: EndpointMode::Relay,
        geocoder_upstream_origin: server.url("/").to_string(),
        relay_listen_addr: "127.0.0.1:0".into(),
        ..AppConfig::defaults()
    };
    let (state, _sink, _dir) = boot(config).await;
    assert!(state.relay().is_some());
    let controller = state.controller();
    controller.save_credential(APP_ID).unwrap();

    let suggestions = controller.suggest("渋谷").await;
    let items = match suggestions {
        address_mapper_lib::SuggestOutcome::Shown { items } => items,
        other => panic!("expected suggestions, got {other:?}"),
    };
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].address, "渋谷駅");

    let outcome = controller.select_suggestion(0).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Added { index: 0, .. }));
    assert!(controller.snapshot().suggestions.is_empty());

    assert_eq!(controller.clear_all(true), ClearOutcome::Cleared { removed: 1 });
}
