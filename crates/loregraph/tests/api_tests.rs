//! HTTP API tests
//!
//! Drive the router in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use loregraph_server::MemoryGraph;
use loregraph_server::testing::{new_graph, seed_pair, test_router};
use serde_json::{Value, json};
use tower::ServiceExt;

// =============================================================================
// Test Fixtures and Helpers
// =============================================================================

fn router() -> (Arc<MemoryGraph>, Router) {
    let graph = Arc::new(new_graph());
    let router = test_router(graph.clone());
    (graph, router)
}

async fn seeded_router() -> (Arc<MemoryGraph>, Router) {
    let (graph, router) = router();
    seed_pair(&graph).await;
    (graph, router)
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, Method::GET, uri, None, &[]).await
}

// =============================================================================
// Basic Routes
// =============================================================================

mod basic_tests {
    use super::*;

    #[tokio::test]
    async fn test_health() {
        let (_, router) = router();
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_root_reports_name() {
        let (_, router) = router();
        let (status, body) = get(&router, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "loregraph");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (_, router) = router();
        let (status, _) = get(&router, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body_uses_error_shape() {
        let (_, router) = router();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/nodes/entities")
            .header("content-type", "application/json")
            .body(Body::from("{\"entity_id\": "))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["kind"], "validation_error");
        assert!(body["error"]["message"].as_str().unwrap().starts_with("Validation error"));
    }

    #[tokio::test]
    async fn test_missing_field_and_bad_query_use_error_shape() {
        let (_, router) = seeded_router().await;

        let (status, body) = send(
            &router,
            Method::POST,
            "/nodes/entities",
            Some(json!({"entity_id": "char_c", "name": "Cleo"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation_error");
        assert!(body["error"]["message"].as_str().unwrap().contains("node_type"));

        let (status, body) = send(
            &router,
            Method::DELETE,
            "/edges/direct/char_a/char_b?force=maybe",
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation_error");
    }
}

// =============================================================================
// Node Routes
// =============================================================================

mod node_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_read_entity() {
        let (_, router) = router();
        let (status, body) = send(
            &router,
            Method::POST,
            "/nodes/entities",
            Some(json!({
                "entity_id": "char_1",
                "node_type": "character",
                "name": "Mara",
                "content": "A smuggler"
            })),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["state_id"], "char_1_v1");
        assert_eq!(body["version"], 1);

        let (status, body) = get(&router, "/nodes/entities/char_1?include_history=true").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Mara");
        assert_eq!(body["content"], "A smuggler");
        assert_eq!(body["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_shapes() {
        let (_, router) = seeded_router().await;

        let (status, body) = get(&router, "/nodes/entities/ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
        assert_eq!(body["error"]["resource"], "entity");
        assert_eq!(body["error"]["id"], "ghost");

        let (status, body) = send(
            &router,
            Method::POST,
            "/nodes/entities",
            Some(json!({
                "entity_id": "char_a",
                "node_type": "character",
                "name": "Alice",
                "content": "again"
            })),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["kind"], "conflict");

        let (status, body) = send(
            &router,
            Method::POST,
            "/nodes/entities",
            Some(json!({
                "entity_id": "char_z",
                "node_type": "dragon",
                "name": "Z",
                "content": "scales"
            })),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation_error");
        assert!(body["error"].get("resource").is_none());
    }

    #[tokio::test]
    async fn test_update_history_and_state_delete() {
        let (_, router) = seeded_router().await;

        let (status, body) = send(
            &router,
            Method::POST,
            "/nodes/entities/char_b/update",
            Some(json!({"content": "Bob v2"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["new_version"], 2);

        let (_, body) = get(&router, "/nodes/entities/char_b/history").await;
        assert_eq!(body["count"], 2);

        // v1 is pinned by the edge from char_a
        let (status, _) = send(&router, Method::DELETE, "/nodes/states/char_b_v1", None, &[]).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&router, Method::DELETE, "/nodes/states/char_b_v2", None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = get(&router, "/nodes/states/char_b_v1").await;
        assert_eq!(body["in_count"], 1);
    }

    #[tokio::test]
    async fn test_ids_with_reserved_url_characters() {
        let (_, router) = router();
        let id = "lore/north tower";
        let (status, _) = send(
            &router,
            Method::POST,
            "/nodes/entities",
            Some(json!({
                "entity_id": id,
                "node_type": "location",
                "name": "North Tower",
                "content": "cold stone"
            })),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let uri = format!("/nodes/entities/{}", urlencoding::encode(id));
        let (status, body) = get(&router, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entity_id"], id);
    }

    #[tokio::test]
    async fn test_parent_links() {
        let (_, router) = seeded_router().await;
        send(
            &router,
            Method::POST,
            "/nodes/entities",
            Some(json!({
                "entity_id": "house",
                "node_type": "faction",
                "name": "House Vey",
                "content": "old family"
            })),
            &[],
        )
        .await;

        let link = json!({"child_id": "char_a", "parent_id": "house"});
        let (status, body) =
            send(&router, Method::POST, "/nodes/parent-child/link", Some(link.clone()), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], true);

        let (_, body) =
            send(&router, Method::POST, "/nodes/parent-child/link", Some(link.clone()), &[]).await;
        assert_eq!(body["created"], false);

        let (_, body) = get(&router, "/nodes/entities/house/children").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["children"][0]["entity_id"], "char_a");

        let (_, body) =
            send(&router, Method::POST, "/nodes/parent-child/unlink", Some(link), &[]).await;
        assert_eq!(body["deleted"], true);
    }
}

// =============================================================================
// Edge Routes
// =============================================================================

mod edge_tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_edge_round_trip() {
        let (_, router) = seeded_router().await;

        let (status, body) = get(&router, "/edges/direct/char_a/char_b").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["relation"], "KNOWS");
        assert_eq!(body["target_name"], "Bob");

        let (status, body) = send(
            &router,
            Method::PUT,
            "/edges/direct/char_b/char_a",
            Some(json!({"relation": "TRUSTS", "content": "with his life"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], true);
        assert_eq!(body["edge_id"], "char_b__DIRECT__char_a");

        let (_, body) = get(&router, "/edges/outbound/char_b").await;
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn test_relay_routes() {
        let (_, router) = seeded_router().await;

        let (status, body) = send(
            &router,
            Method::PUT,
            "/edges/relay/char_a/char_b/first_meeting",
            Some(json!({"content": "rain on the docks"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let edge_id = body["edge_id"].as_str().unwrap().to_string();
        assert_eq!(edge_id, "char_a__first_meeting__char_b");

        let (_, body) = get(&router, "/edges/relationship/char_a/char_b").await;
        assert_eq!(body["relays"].as_array().unwrap().len(), 1);
        assert_eq!(body["relays"][0]["state"]["content"], "rain on the docks");

        let uri = format!("/edges/relay/{edge_id}");
        let (status, _) = send(&router, Method::DELETE, &uri, None, &[]).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = get(&router, "/edges/relay/char_a/char_b/first_meeting").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_direct_edge_delete_guards_chapters() {
        let (_, router) = seeded_router().await;
        send(
            &router,
            Method::PUT,
            "/edges/relay/char_a/char_b/first_meeting",
            Some(json!({"content": "rain on the docks"})),
            &[],
        )
        .await;

        let (status, body) = send(&router, Method::DELETE, "/edges/direct/char_a/char_b", None, &[]).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["kind"], "conflict");

        let (status, body) = send(
            &router,
            Method::DELETE,
            "/edges/direct/char_a/char_b?force=true",
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed_relay_links"][0], "char_a__first_meeting__char_b");
    }

    #[tokio::test]
    async fn test_direct_edge_inheritable_round_trip() {
        let (_, router) = seeded_router().await;
        let (status, body) = send(
            &router,
            Method::PUT,
            "/edges/direct/char_b/char_a",
            Some(json!({"relation": "TRUSTS", "content": "quietly", "inheritable": false})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["inheritable"], false);

        let (_, body) = get(&router, "/edges/direct/char_b/char_a").await;
        assert_eq!(body["inheritable"], false);
        let (_, body) = get(&router, "/edges/direct/char_a/char_b").await;
        assert_eq!(body["inheritable"], true);
    }

    #[tokio::test]
    async fn test_relay_without_direct_edge_is_404() {
        let (_, router) = seeded_router().await;
        let (status, body) = send(
            &router,
            Method::PUT,
            "/edges/relay/char_b/char_a/betrayal",
            Some(json!({"content": "..."})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["resource"], "direct edge");
    }
}

// =============================================================================
// Review Routes
// =============================================================================

mod review_tests {
    use super::*;

    #[tokio::test]
    async fn test_session_header_records_snapshot_and_rollback() {
        let (graph, router) = seeded_router().await;

        let (status, _) = send(
            &router,
            Method::POST,
            "/nodes/entities/char_a/update",
            Some(json!({"content": "Alice v2"})),
            &[("x-review-session", "s1")],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = get(&router, "/review/sessions").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["sessions"][0]["session_id"], "s1");

        let (_, body) = get(&router, "/review/sessions/s1/snapshots").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["snapshots"][0]["snapshot_content"], "Alice v1");

        let (status, body) = get(&router, "/review/sessions/s1/diff/entity/char_a").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_changes"], true);
        assert_eq!(body["current_content"], "Alice v2");

        let (status, body) = send(
            &router,
            Method::POST,
            "/review/sessions/s1/rollback/entity/char_a?task_description=undo",
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(
            graph.get_current_state("char_a").await.unwrap().content,
            "Alice v1"
        );
    }

    #[tokio::test]
    async fn test_untracked_mode_header() {
        let (graph, router) = seeded_router().await;
        send(
            &router,
            Method::POST,
            "/nodes/entities/char_a/update",
            Some(json!({"content": "Alice v2"})),
            &[("x-review-session", "s1"), ("x-review-mode", "untracked")],
        )
        .await;
        assert!(graph.list_sessions().await.is_empty());

        let (status, _) = send(
            &router,
            Method::POST,
            "/nodes/entities/char_a/update",
            Some(json!({"content": "Alice v3"})),
            &[("x-review-mode", "sometimes")],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_approve_and_bad_resource_type() {
        let (_, router) = seeded_router().await;
        send(
            &router,
            Method::PUT,
            "/edges/direct/char_a/char_b",
            Some(json!({"relation": "KNOWS", "content": "old friends"})),
            &[("x-review-session", "s1")],
        )
        .await;

        let (status, _) = send(
            &router,
            Method::POST,
            "/review/sessions/s1/approve/vertex/char_a__DIRECT__char_b",
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &router,
            Method::POST,
            "/review/sessions/s1/approve/direct_edge/char_a__DIRECT__char_b",
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_closed"], true);

        let (_, body) = get(&router, "/review/sessions").await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_open_session_and_text_diff() {
        let (_, router) = router();
        let (status, body) = send(
            &router,
            Method::POST,
            "/review/sessions",
            Some(json!({"session_id": "draft"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["session_id"], "draft");

        let (status, body) = send(
            &router,
            Method::POST,
            "/review/diff",
            Some(json!({"text_a": "one\ntwo\n", "text_b": "one\nthree\n"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_changes"], true);

        let (status, _) = send(&router, Method::DELETE, "/review/sessions/draft", None, &[]).await;
        assert_eq!(status, StatusCode::OK);
    }
}

// =============================================================================
// Maintenance, Catalog and Admin Routes
// =============================================================================

mod maintenance_tests {
    use super::*;

    #[tokio::test]
    async fn test_orphan_scan_and_batch_delete() {
        let (_, router) = seeded_router().await;

        let (status, body) = get(&router, "/maintenance/orphan_states?mode=all_zero").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "all_zero");
        assert_eq!(body["count"], 0);

        let (_, body) = get(&router, "/maintenance/orphan_states?limit=1").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["states"][0]["state_id"], "char_a_v1");

        let (status, _) = get(&router, "/maintenance/orphan_states?mode=everything").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &router,
            Method::POST,
            "/maintenance/delete_states",
            Some(json!({"state_ids": ["char_b_v1", "ghost_v1"]})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted_count"], 0);
        assert_eq!(body["failed_count"], 2);
        assert_eq!(body["failed"][0]["kind"], "conflict");
        assert_eq!(body["failed"][1]["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_orphan_entities_route() {
        let (_, router) = router();
        let (_, body) = get(&router, "/maintenance/orphan_entities").await;
        assert_eq!(body["count"], 0);

        let (status, _) = send(
            &router,
            Method::POST,
            "/maintenance/delete_entities",
            Some(json!({"entity_ids": []})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_catalog_and_stats() {
        let (_, router) = seeded_router().await;

        let (status, body) = get(&router, "/catalog").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["entities"][0]["entity_id"], "char_a");
        assert_eq!(body["entities"][0]["edges"][0]["target_name"], "Bob");

        let (status, body) = get(&router, "/admin/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entities"], 2);
        assert_eq!(body["direct_edges"], 1);
        assert_eq!(body["sessions"], 0);
    }
}
