//! Integration tests for orphan scans and batch deletes

use loregraph_server::graph::NodeType;
use loregraph_server::maintenance::OrphanMode;
use loregraph_server::review::WriteContext;
use loregraph_server::testing::{chapter, character, new_graph, seed_pair};

const UNTRACKED: WriteContext = WriteContext::Untracked;

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// =============================================================================
// Orphan State Tests
// =============================================================================

mod orphan_state_tests {
    use super::*;

    #[tokio::test]
    async fn test_modes_respect_reference_counts() {
        let graph = new_graph();
        seed_pair(&graph).await;
        graph
            .create_entity(character("char_c", "Cato", "alone"), &UNTRACKED)
            .await
            .unwrap();

        let all_zero = graph.find_orphan_states(OrphanMode::AllZero, 100).await;
        let found: Vec<&str> = all_zero.iter().map(|s| s.state_id.as_str()).collect();
        assert_eq!(found, vec!["char_c_v1"]);
        assert!(all_zero[0].is_current);
        assert!(all_zero.iter().all(|s| s.in_count == 0 && s.out_count == 0));

        let in_zero = graph.find_orphan_states(OrphanMode::InZero, 100).await;
        let found: Vec<&str> = in_zero.iter().map(|s| s.state_id.as_str()).collect();
        assert_eq!(found, vec!["char_a_v1", "char_c_v1"]);
        assert_eq!(in_zero[0].out_count, 1);
    }

    #[tokio::test]
    async fn test_limit_and_version_order() {
        let graph = new_graph();
        graph
            .create_entity(character("char_1", "Mara", "v1"), &UNTRACKED)
            .await
            .unwrap();
        for n in 2..=4 {
            graph
                .create_version("char_1", loregraph_server::testing::version(&format!("v{n}")), &UNTRACKED)
                .await
                .unwrap();
        }

        let found = graph.find_orphan_states(OrphanMode::AllZero, 2).await;
        let versions: Vec<u64> = found.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![4, 3]);
        assert!(found[0].is_current);
        assert!(!found[1].is_current);
        assert_eq!(found[0].entity_type, NodeType::Character);
    }

    #[tokio::test]
    async fn test_orphaned_chapter_shows_up() {
        let graph = new_graph();
        seed_pair(&graph).await;
        let written = graph
            .upsert_relay_edge("char_a", "char_b", "first_meeting", chapter("rain"), &UNTRACKED)
            .await
            .unwrap();
        graph
            .delete_direct_edge("char_a", "char_b", true, &UNTRACKED)
            .await
            .unwrap();

        let found = graph.find_orphan_states(OrphanMode::AllZero, 100).await;
        let chapter_state = found
            .iter()
            .find(|s| s.state_id == written.state_id)
            .expect("orphaned chapter state listed");
        assert_eq!(chapter_state.entity_type, NodeType::Relationship);
        assert_eq!(chapter_state.name, "first_meeting");
    }

    #[tokio::test]
    async fn test_snippet_is_truncated() {
        let graph = new_graph();
        graph
            .create_entity(character("char_1", "Mara", &"x".repeat(400)), &UNTRACKED)
            .await
            .unwrap();
        let found = graph.find_orphan_states(OrphanMode::InZero, 10).await;
        assert!(found[0].content_snippet.ends_with(" [truncated]"));
        assert!(found[0].content_snippet.len() < 400);
    }
}

// =============================================================================
// Batch Delete Tests
// =============================================================================

mod batch_delete_tests {
    use super::*;

    #[tokio::test]
    async fn test_state_batch_reports_partial_failure() {
        let graph = new_graph();
        seed_pair(&graph).await;

        let report = graph
            .delete_states_batch(&ids(&["char_b_v1", "ghost_v1", "char_a_v1"]))
            .await
            .unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.deleted, ids(&["char_a_v1"]));
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.failed[0].id, "char_b_v1");
        assert_eq!(report.failed[0].kind, "conflict");
        assert_eq!(report.failed[1].kind, "not_found");

        // Deleting the viewer state released the edge, so the target is free now
        let retry = graph
            .delete_states_batch(&ids(&["char_b_v1"]))
            .await
            .unwrap();
        assert_eq!(retry.deleted_count, 1);
    }

    #[tokio::test]
    async fn test_orphan_entities_and_batch_delete() {
        let graph = new_graph();
        for id in ["house", "char_1", "char_2"] {
            graph
                .create_entity(character(id, id, "..."), &UNTRACKED)
                .await
                .unwrap();
        }
        graph.link_parent("char_1", "house").await.unwrap();
        graph
            .delete_states_batch(&ids(&["house_v1", "char_1_v1", "char_2_v1"]))
            .await
            .unwrap();

        let orphans = graph.find_orphan_entities(100).await;
        let found: Vec<&str> = orphans.iter().map(|e| e.entity_id.as_str()).collect();
        // `house` still has a child
        assert_eq!(found, vec!["char_1", "char_2"]);
        assert_eq!(orphans[0].parent_count, 1);

        let report = graph
            .delete_entities_batch(&ids(&["char_1", "char_2", "house"]))
            .await
            .unwrap();
        assert_eq!(report.deleted_count, 3);
        assert_eq!(graph.store().entity_count(), 0);
    }

    #[tokio::test]
    async fn test_entity_batch_refuses_entities_with_states() {
        let graph = new_graph();
        seed_pair(&graph).await;
        let report = graph
            .delete_entities_batch(&ids(&["char_a", "ghost"]))
            .await
            .unwrap();
        assert_eq!(report.deleted_count, 0);
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.failed[0].kind, "conflict");
    }

    #[tokio::test]
    async fn test_empty_batches_are_rejected() {
        let graph = new_graph();
        assert!(graph.delete_states_batch(&[]).await.unwrap_err().is_validation());
        assert!(graph.delete_entities_batch(&[]).await.unwrap_err().is_validation());
    }
}
