//! Integration tests for review sessions
//!
//! Tests snapshot capture on tracked writes, diffs against the pre-session
//! baseline, and approve / rollback / clear for every resource type.

use loregraph_server::MemoryGraph;
use loregraph_server::admin::GraphEvent;
use loregraph_server::review::{OperationType, ResourceType, WriteContext};
use loregraph_server::testing::{
    chapter, character, direct, new_graph, seed_pair, test_config, version,
};

// =============================================================================
// Test Fixtures and Helpers
// =============================================================================

const UNTRACKED: WriteContext = WriteContext::Untracked;

fn session(id: &str) -> WriteContext {
    WriteContext::Session(id.to_string())
}

/// `char_1` at version 1 with content "A", created outside any session
async fn graph_with_char() -> MemoryGraph {
    let graph = new_graph();
    graph
        .create_entity(character("char_1", "Mara", "A"), &UNTRACKED)
        .await
        .unwrap();
    graph
}

// =============================================================================
// Snapshot Capture Tests
// =============================================================================

mod capture_tests {
    use super::*;

    #[tokio::test]
    async fn test_untracked_writes_open_no_session() {
        let graph = graph_with_char().await;
        graph
            .create_version("char_1", version("B"), &UNTRACKED)
            .await
            .unwrap();
        assert!(graph.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_auto_context_opens_one_session() {
        let graph = graph_with_char().await;
        graph
            .create_version("char_1", version("B"), &WriteContext::Auto)
            .await
            .unwrap();
        graph
            .create_entity(character("char_2", "Ivo", "new"), &WriteContext::Auto)
            .await
            .unwrap();

        let sessions = graph.list_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].session_id.starts_with("session_"));
        assert_eq!(sessions[0].resource_count, 2);

        let snapshots = graph.list_snapshots(&sessions[0].session_id).await.unwrap();
        assert_eq!(snapshots[0].operation_type, OperationType::Modify);
        assert_eq!(snapshots[0].snapshot_content.as_deref(), Some("A"));
        assert_eq!(snapshots[1].operation_type, OperationType::Create);
        assert_eq!(snapshots[1].snapshot_content, None);
    }

    #[tokio::test]
    async fn test_tracking_disabled_by_config() {
        let mut config = test_config();
        config.review.track_by_default = false;
        let graph = MemoryGraph::new(&config);

        graph
            .create_entity(character("char_1", "Mara", "A"), &WriteContext::Auto)
            .await
            .unwrap();
        assert!(graph.list_sessions().await.is_empty());

        // An explicit session is still honoured
        graph
            .create_version("char_1", version("B"), &session("s1"))
            .await
            .unwrap();
        assert_eq!(graph.list_snapshots("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_first_snapshot_wins() {
        let graph = graph_with_char().await;
        for content in ["B", "C"] {
            graph
                .create_version("char_1", version(content), &session("s1"))
                .await
                .unwrap();
        }

        let snapshots = graph.list_snapshots("s1").await.unwrap();
        assert_eq!(snapshots.len(), 1);

        let diff = graph
            .diff("s1", ResourceType::Entity, "char_1")
            .await
            .unwrap();
        assert_eq!(diff.snapshot_content.as_deref(), Some("A"));
        assert_eq!(diff.current_content, "C");
    }

    #[tokio::test]
    async fn test_failed_write_records_nothing() {
        let graph = graph_with_char().await;
        let err = graph
            .create_version("char_1", version(""), &session("s1"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(!graph.ledger().session_exists("s1").await);
    }

    #[tokio::test]
    async fn test_tracked_write_emits_event_with_session() {
        let graph = graph_with_char().await;
        let mut events = graph.subscribe();

        graph
            .create_version("char_1", version("B"), &session("s1"))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            GraphEvent::VersionCreated {
                entity_id: "char_1".to_string(),
                version: 2,
                session_id: Some("s1".to_string()),
            }
        );
    }
}

// =============================================================================
// Diff Tests
// =============================================================================

mod diff_tests {
    use super::*;

    #[tokio::test]
    async fn test_edit_rollback_scenario() {
        let graph = graph_with_char().await;
        graph
            .create_version("char_1", version("B"), &session("s1"))
            .await
            .unwrap();

        let diff = graph
            .diff("s1", ResourceType::Entity, "char_1")
            .await
            .unwrap();
        assert_eq!(diff.snapshot_content.as_deref(), Some("A"));
        assert_eq!(diff.current_content, "B");
        assert!(diff.has_changes);
        assert_eq!(diff.operation_type, Some(OperationType::Modify));

        let outcome = graph
            .rollback("s1", ResourceType::Entity, "char_1", None)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.new_version, Some(1));

        let current = graph.get_current_state("char_1").await.unwrap();
        assert_eq!(current.content, "A");
        assert_eq!(current.version, 1);

        let sessions = graph.list_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "s1");
        assert_eq!(sessions[0].resource_count, 0);

        graph.open_session(Some("s2".to_string())).await.unwrap();
        let fresh = graph
            .diff("s2", ResourceType::Entity, "char_1")
            .await
            .unwrap();
        assert!(!fresh.has_changes);
        assert_eq!(fresh.operation_type, None);
    }

    #[tokio::test]
    async fn test_diff_of_created_entity_has_empty_baseline() {
        let graph = new_graph();
        graph
            .create_entity(character("char_1", "Mara", "line one\nline two"), &session("s1"))
            .await
            .unwrap();

        let diff = graph
            .diff("s1", ResourceType::Entity, "char_1")
            .await
            .unwrap();
        assert_eq!(diff.snapshot_content, None);
        assert!(diff.has_changes);
        assert!(diff.diff_summary.starts_with("New content"));
    }

    #[tokio::test]
    async fn test_diff_errors() {
        let graph = graph_with_char().await;
        let unknown_session = graph
            .diff("nope", ResourceType::Entity, "char_1")
            .await
            .unwrap_err();
        assert!(unknown_session.is_not_found());

        graph.open_session(Some("s1".to_string())).await.unwrap();
        let unknown_resource = graph
            .diff("s1", ResourceType::Entity, "ghost")
            .await
            .unwrap_err();
        assert!(unknown_resource.is_not_found());
    }

    #[tokio::test]
    async fn test_text_diff_utility() {
        let graph = new_graph();
        let diff = graph.text_diff("a\nb\nc", "a\nB\nc");
        assert!(diff.has_changes);
        assert!(diff.diff_unified.contains("-b"));
        assert!(diff.diff_unified.contains("+B"));
        assert!(!graph.text_diff("same", "same").has_changes);
    }
}

// =============================================================================
// Approve and Clear Tests
// =============================================================================

mod approve_tests {
    use super::*;

    #[tokio::test]
    async fn test_approve_closes_empty_session() {
        let graph = graph_with_char().await;
        graph
            .create_version("char_1", version("B"), &session("s1"))
            .await
            .unwrap();

        let outcome = graph
            .approve("s1", ResourceType::Entity, "char_1")
            .await
            .unwrap();
        assert!(outcome.session_closed);
        assert!(graph.list_sessions().await.is_empty());
        assert_eq!(graph.get_current_state("char_1").await.unwrap().content, "B");

        let again = graph
            .approve("s1", ResourceType::Entity, "char_1")
            .await
            .unwrap_err();
        assert!(again.is_not_found());
    }

    #[tokio::test]
    async fn test_approve_without_snapshot_is_not_found() {
        let graph = graph_with_char().await;
        graph.open_session(Some("s1".to_string())).await.unwrap();
        let err = graph
            .approve("s1", ResourceType::Entity, "char_1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_clear_session_keeps_latest_values() {
        let graph = graph_with_char().await;
        graph
            .create_entity(character("char_2", "Ivo", "X"), &UNTRACKED)
            .await
            .unwrap();
        graph
            .create_version("char_1", version("B"), &session("s1"))
            .await
            .unwrap();
        graph
            .create_version("char_2", version("Y"), &session("s1"))
            .await
            .unwrap();

        let cleared = graph.clear_session("s1").await.unwrap();
        assert_eq!(cleared.approved, 2);
        assert!(graph.list_sessions().await.is_empty());
        assert_eq!(graph.get_current_state("char_1").await.unwrap().content, "B");
        assert_eq!(graph.get_current_state("char_2").await.unwrap().content, "Y");

        assert!(graph.clear_session("s1").await.unwrap_err().is_not_found());
    }
}

// =============================================================================
// Entity Rollback Tests
// =============================================================================

mod entity_rollback_tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_of_create_removes_entity() {
        let graph = new_graph();
        graph
            .create_entity(character("char_1", "Mara", "A"), &session("s1"))
            .await
            .unwrap();

        graph
            .rollback("s1", ResourceType::Entity, "char_1", None)
            .await
            .unwrap();
        assert!(!graph.store().contains("char_1"));
        assert!(graph.get_state("char_1_v1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rollback_of_referenced_create_is_refused() {
        let graph = new_graph();
        graph
            .create_entity(character("char_1", "Mara", "A"), &session("s1"))
            .await
            .unwrap();
        graph
            .create_entity(character("char_2", "Ivo", "X"), &UNTRACKED)
            .await
            .unwrap();
        graph
            .upsert_direct_edge("char_2", "char_1", direct("FEARS", "..."), &UNTRACKED)
            .await
            .unwrap();

        let err = graph
            .rollback("s1", ResourceType::Entity, "char_1", None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(graph.list_snapshots("s1").await.unwrap().len(), 1);
        assert!(graph.store().contains("char_1"));
    }

    #[tokio::test]
    async fn test_rollback_writes_new_version_when_newer_state_is_referenced() {
        let graph = graph_with_char().await;
        graph
            .create_version("char_1", version("B"), &session("s1"))
            .await
            .unwrap();
        graph
            .create_entity(character("char_2", "Ivo", "X"), &UNTRACKED)
            .await
            .unwrap();
        graph
            .upsert_direct_edge("char_2", "char_1", direct("FEARS", "..."), &UNTRACKED)
            .await
            .unwrap();

        let outcome = graph
            .rollback("s1", ResourceType::Entity, "char_1", Some("undo".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome.new_version, Some(3));

        let current = graph.get_current_state("char_1").await.unwrap();
        assert_eq!(current.content, "A");
        assert_eq!(current.task_description.as_deref(), Some("undo"));
        assert_eq!(graph.get_state("char_1_v2").await.unwrap().in_count, 1);
    }

    #[tokio::test]
    async fn test_rollback_truncates_versions_of_its_own_session() {
        let graph = graph_with_char().await;
        for content in ["B", "C"] {
            graph
                .create_version("char_1", version(content), &session("s1"))
                .await
                .unwrap();
        }

        let outcome = graph
            .rollback("s1", ResourceType::Entity, "char_1", None)
            .await
            .unwrap();
        assert_eq!(outcome.new_version, Some(1));
        assert_eq!(graph.list_history("char_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_keeps_versions_written_outside_the_session() {
        let graph = graph_with_char().await;
        graph
            .create_version("char_1", version("B"), &session("s1"))
            .await
            .unwrap();
        graph
            .create_version("char_1", version("C"), &session("s2"))
            .await
            .unwrap();
        graph
            .create_version("char_1", version("D"), &UNTRACKED)
            .await
            .unwrap();

        let outcome = graph
            .rollback("s1", ResourceType::Entity, "char_1", None)
            .await
            .unwrap();
        assert_eq!(outcome.new_version, Some(5));

        let history: Vec<(u64, String)> = graph
            .list_history("char_1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.version, s.content))
            .collect();
        assert_eq!(
            history,
            vec![
                (5, "A".to_string()),
                (4, "D".to_string()),
                (3, "C".to_string()),
                (2, "B".to_string()),
                (1, "A".to_string()),
            ]
        );

        let pending = graph.list_snapshots("s2").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].snapshot_content.as_deref(), Some("B"));
        assert!(graph.get_state("char_1_v3").await.is_ok());
    }

    #[tokio::test]
    async fn test_refused_rollback_keeps_snapshot_order() {
        let graph = new_graph();
        graph
            .create_entity(character("char_1", "Mara", "A"), &session("s1"))
            .await
            .unwrap();
        graph
            .create_entity(character("char_2", "Ivo", "X"), &session("s1"))
            .await
            .unwrap();
        graph
            .upsert_direct_edge("char_2", "char_1", direct("FEARS", "..."), &UNTRACKED)
            .await
            .unwrap();

        let err = graph
            .rollback("s1", ResourceType::Entity, "char_1", None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let ids: Vec<String> = graph
            .list_snapshots("s1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.resource_id)
            .collect();
        assert_eq!(ids, vec!["char_1", "char_2"]);
        graph
            .approve("s1", ResourceType::Entity, "char_1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rollback_recreates_deleted_entity() {
        let graph = graph_with_char().await;
        graph
            .create_version("char_1", version("B"), &session("s1"))
            .await
            .unwrap();
        graph.delete_state("char_1_v2").await.unwrap();
        graph.delete_state("char_1_v1").await.unwrap();
        graph.delete_entity("char_1").await.unwrap();

        let outcome = graph
            .rollback("s1", ResourceType::Entity, "char_1", None)
            .await
            .unwrap();
        assert_eq!(outcome.new_version, Some(1));

        let current = graph.get_current_state("char_1").await.unwrap();
        assert_eq!(current.content, "A");
        assert_eq!(current.name, "Mara");
    }

    #[tokio::test]
    async fn test_rollback_without_snapshot_is_not_found() {
        let graph = graph_with_char().await;
        let err = graph
            .rollback("s1", ResourceType::Entity, "char_1", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

// =============================================================================
// Edge Rollback Tests
// =============================================================================

mod edge_rollback_tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_restores_direct_edge_content() {
        let graph = new_graph();
        seed_pair(&graph).await;
        graph
            .upsert_direct_edge("char_a", "char_b", direct("DISTRUSTS", "fell out"), &session("s1"))
            .await
            .unwrap();

        let diff = graph
            .diff("s1", ResourceType::DirectEdge, "char_a__DIRECT__char_b")
            .await
            .unwrap();
        assert_eq!(diff.snapshot_content.as_deref(), Some("met at the inn"));
        assert_eq!(diff.current_content, "fell out");

        graph
            .rollback("s1", ResourceType::DirectEdge, "char_a__DIRECT__char_b", None)
            .await
            .unwrap();
        let edge = graph.get_direct_edge("char_a", "char_b").await.unwrap();
        assert_eq!(edge.relation, "KNOWS");
        assert_eq!(edge.content, "met at the inn");
    }

    #[tokio::test]
    async fn test_rollback_of_created_edge_deletes_it() {
        let graph = new_graph();
        for id in ["char_a", "char_b"] {
            graph
                .create_entity(character(id, id, "..."), &UNTRACKED)
                .await
                .unwrap();
        }
        graph
            .upsert_direct_edge("char_a", "char_b", direct("KNOWS", "hello"), &session("s1"))
            .await
            .unwrap();

        graph
            .rollback("s1", ResourceType::DirectEdge, "char_a__DIRECT__char_b", None)
            .await
            .unwrap();
        assert!(graph.get_direct_edge("char_a", "char_b").await.unwrap_err().is_not_found());
        assert_eq!(graph.get_state("char_b_v1").await.unwrap().in_count, 0);
    }

    #[tokio::test]
    async fn test_rollback_of_edge_delete_restores_chapters() {
        let graph = new_graph();
        seed_pair(&graph).await;
        let written = graph
            .upsert_relay_edge("char_a", "char_b", "first_meeting", chapter("rain"), &UNTRACKED)
            .await
            .unwrap();

        graph
            .delete_direct_edge("char_a", "char_b", true, &session("s1"))
            .await
            .unwrap();
        assert_eq!(graph.list_snapshots("s1").await.unwrap().len(), 2);

        graph
            .rollback("s1", ResourceType::DirectEdge, "char_a__DIRECT__char_b", None)
            .await
            .unwrap();
        let outcome = graph
            .rollback("s1", ResourceType::RelayEdge, &written.edge_id, None)
            .await
            .unwrap();
        assert_eq!(outcome.new_version, Some(2));

        let view = graph
            .get_relay_edge("char_a", "char_b", "first_meeting")
            .await
            .unwrap();
        assert_eq!(view.state.content, "rain");
        assert_eq!(graph.get_state("char_b_v1").await.unwrap().in_count, 2);
    }

    #[tokio::test]
    async fn test_rollback_of_created_chapter_removes_sub_entity() {
        let graph = new_graph();
        seed_pair(&graph).await;
        let written = graph
            .upsert_relay_edge("char_a", "char_b", "first_meeting", chapter("rain"), &session("s1"))
            .await
            .unwrap();

        let outcome = graph
            .rollback("s1", ResourceType::RelayEdge, &written.edge_id, None)
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(!graph.store().contains(&written.relay_entity_id));
        assert_eq!(graph.get_state("char_b_v1").await.unwrap().in_count, 1);
        assert_eq!(graph.list_outbound_edges("char_a").await.unwrap()[0].relay_count, 0);
    }

    #[tokio::test]
    async fn test_rollback_of_created_chapter_keeps_foreign_chapter_states() {
        let graph = new_graph();
        seed_pair(&graph).await;
        let written = graph
            .upsert_relay_edge("char_a", "char_b", "first_meeting", chapter("rain"), &session("s1"))
            .await
            .unwrap();
        graph
            .upsert_relay_edge("char_a", "char_b", "first_meeting", chapter("storm"), &session("s2"))
            .await
            .unwrap();

        let outcome = graph
            .rollback("s1", ResourceType::RelayEdge, &written.edge_id, None)
            .await
            .unwrap();
        assert_eq!(outcome.message, "Chapter link removed");
        assert!(graph
            .get_relay_edge("char_a", "char_b", "first_meeting")
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(graph.list_history(&written.relay_entity_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_of_chapter_edit_restores_content() {
        let graph = new_graph();
        seed_pair(&graph).await;
        let written = graph
            .upsert_relay_edge("char_a", "char_b", "first_meeting", chapter("rain"), &UNTRACKED)
            .await
            .unwrap();
        graph
            .upsert_relay_edge("char_a", "char_b", "first_meeting", chapter("storm"), &session("s1"))
            .await
            .unwrap();

        graph
            .rollback("s1", ResourceType::RelayEdge, &written.edge_id, None)
            .await
            .unwrap();
        let view = graph
            .get_relay_edge("char_a", "char_b", "first_meeting")
            .await
            .unwrap();
        assert_eq!(view.state.content, "rain");
        assert_eq!(view.chapter_version, 3);
    }
}
