//! Concurrency tests
//!
//! Many tasks writing the same entities at once must still produce
//! contiguous versions and exact reference counts.

use std::collections::BTreeSet;
use std::sync::Arc;

use loregraph_server::review::WriteContext;
use loregraph_server::testing::{character, direct, new_graph, version};

const UNTRACKED: WriteContext = WriteContext::Untracked;

mod version_allocation_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_versions_are_distinct_and_contiguous() {
        let graph = Arc::new(new_graph());
        graph
            .create_entity(character("char_1", "Mara", "v1"), &UNTRACKED)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for n in 0..32 {
            let graph = graph.clone();
            handles.push(tokio::spawn(async move {
                graph
                    .create_version("char_1", version(&format!("edit {n}")), &UNTRACKED)
                    .await
                    .unwrap()
                    .new_version
            }));
        }

        let mut versions = BTreeSet::new();
        for handle in handles {
            assert!(versions.insert(handle.await.unwrap()));
        }
        assert_eq!(versions, (2..=33).collect::<BTreeSet<u64>>());

        let history = graph.list_history("char_1").await.unwrap();
        assert_eq!(history.len(), 33);
        assert_eq!(graph.get_current_state("char_1").await.unwrap().version, 33);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tracked_edits_share_one_snapshot() {
        let graph = Arc::new(new_graph());
        graph
            .create_entity(character("char_1", "Mara", "A"), &UNTRACKED)
            .await
            .unwrap();

        let ctx = WriteContext::Session("s1".to_string());
        let mut handles = Vec::new();
        for n in 0..16 {
            let graph = graph.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                graph
                    .create_version("char_1", version(&format!("edit {n}")), &ctx)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshots = graph.list_snapshots("s1").await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].snapshot_content.as_deref(), Some("A"));
    }
}

mod reference_count_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_edges_into_one_target() {
        let graph = Arc::new(new_graph());
        graph
            .create_entity(character("hub", "Hub", "center"), &UNTRACKED)
            .await
            .unwrap();
        for n in 0..20 {
            graph
                .create_entity(character(&format!("spoke_{n}"), "Spoke", "edge"), &UNTRACKED)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for n in 0..20 {
            let graph = graph.clone();
            handles.push(tokio::spawn(async move {
                let viewer = format!("spoke_{n}");
                // Write twice so re-pinning races with other writers
                for _ in 0..2 {
                    graph
                        .upsert_direct_edge(&viewer, "hub", direct("ORBITS", "round"), &UNTRACKED)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(graph.get_state("hub_v1").await.unwrap().in_count, 20);
        assert!(graph.delete_state("hub_v1").await.unwrap_err().is_conflict());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_edge_writes_race_with_target_edits() {
        let graph = Arc::new(new_graph());
        for id in ["char_a", "char_b"] {
            graph
                .create_entity(character(id, id, "v1"), &UNTRACKED)
                .await
                .unwrap();
        }

        let writer = {
            let graph = graph.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    graph
                        .upsert_direct_edge("char_a", "char_b", direct("WATCHES", "..."), &UNTRACKED)
                        .await
                        .unwrap();
                }
            })
        };
        let editor = {
            let graph = graph.clone();
            tokio::spawn(async move {
                for n in 0..20 {
                    graph
                        .create_version("char_b", version(&format!("b{n}")), &UNTRACKED)
                        .await
                        .unwrap();
                }
            })
        };
        writer.await.unwrap();
        editor.await.unwrap();

        // Exactly one pinned target state carries the edge
        let history = graph.list_history("char_b").await.unwrap();
        let total_in: u32 = history.iter().map(|s| s.in_count).sum();
        assert_eq!(total_in, 1);

        let edge = graph.get_direct_edge("char_a", "char_b").await.unwrap();
        let pinned = graph
            .get_state(&format!("char_b_v{}", edge.target_version))
            .await
            .unwrap();
        assert_eq!(pinned.in_count, 1);
    }
}
