//! Command tests against a checkpoint in a temporary data directory

use clap::Parser;
use loregraph_cli::commands::{EdgeCommand, EntityCommand, OrphansCommand, ReviewCommand, StatsCommand};
use loregraph_cli::{GraphFile, OutputFormat};
use loregraph_server::review::WriteContext;
use loregraph_server::testing::{seed_pair, test_config, version};
use tempfile::TempDir;

// =============================================================================
// Test Fixtures and Helpers
// =============================================================================

/// Data directory holding the two seeded characters plus an unpinned `char_b_v2`
async fn seeded_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let file = GraphFile::open(dir.path(), &test_config()).await.unwrap();
    seed_pair(file.graph()).await;
    file.graph()
        .create_version("char_b", version("Bob v2"), &WriteContext::Untracked)
        .await
        .unwrap();
    assert!(file.save_if_changed().await.unwrap());
    dir
}

async fn reopen(dir: &TempDir) -> GraphFile {
    GraphFile::open(dir.path(), &test_config()).await.unwrap()
}

fn parse<T: Parser>(args: &[&str]) -> T {
    T::try_parse_from(std::iter::once("test").chain(args.iter().copied())).unwrap()
}

// =============================================================================
// Entity Commands
// =============================================================================

mod entity_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_and_show_do_not_modify() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;

        parse::<EntityCommand>(&["list", "--type", "character"])
            .execute(file.graph(), OutputFormat::Table)
            .await
            .unwrap();
        parse::<EntityCommand>(&["show", "char_a"])
            .execute(file.graph(), OutputFormat::Json)
            .await
            .unwrap();
        assert!(!file.save_if_changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_type_filter_fails() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        let err = parse::<EntityCommand>(&["list", "--type", "dragon"])
            .execute(file.graph(), OutputFormat::Table)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dragon"));
    }

    #[tokio::test]
    async fn test_delete_state_persists() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        parse::<EntityCommand>(&["delete-state", "char_b_v2"])
            .execute(file.graph(), OutputFormat::Json)
            .await
            .unwrap();
        assert!(file.save_if_changed().await.unwrap());

        let file = reopen(&dir).await;
        let history = file.graph().list_history("char_b").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_referenced_state_delete_fails() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        let result = parse::<EntityCommand>(&["delete-state", "char_b_v1"])
            .execute(file.graph(), OutputFormat::Table)
            .await;
        let err = result.unwrap_err();
        assert!(err.graph_error().is_some_and(|e| e.is_conflict()));
        assert!(!file.save_if_changed().await.unwrap());
    }
}

// =============================================================================
// Edge Commands
// =============================================================================

mod edge_tests {
    use super::*;
    use loregraph_server::testing::chapter;

    #[tokio::test]
    async fn test_list_and_show() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        parse::<EdgeCommand>(&["list", "char_a"])
            .execute(file.graph(), OutputFormat::Table)
            .await
            .unwrap();
        parse::<EdgeCommand>(&["show", "char_a", "char_b"])
            .execute(file.graph(), OutputFormat::Table)
            .await
            .unwrap();
        assert!(!file.save_if_changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_with_chapters_needs_force() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        file.graph()
            .upsert_relay_edge("char_a", "char_b", "first_meeting", chapter("rain"), &WriteContext::Untracked)
            .await
            .unwrap();

        let err = parse::<EdgeCommand>(&["delete", "char_a", "char_b"])
            .execute(file.graph(), OutputFormat::Table)
            .await
            .unwrap_err();
        assert!(err.graph_error().is_some_and(|e| e.is_conflict()));
        assert!(file.graph().get_direct_edge("char_a", "char_b").await.is_ok());

        parse::<EdgeCommand>(&["delete", "char_a", "char_b", "--force"])
            .execute(file.graph(), OutputFormat::Json)
            .await
            .unwrap();
        assert!(file.save_if_changed().await.unwrap());

        let file = reopen(&dir).await;
        assert!(file.graph().get_direct_edge("char_a", "char_b").await.unwrap_err().is_not_found());
    }
}

// =============================================================================
// Orphan Commands
// =============================================================================

mod orphan_tests {
    use super::*;

    #[tokio::test]
    async fn test_purge_dry_run_keeps_everything() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        parse::<OrphansCommand>(&["purge", "--mode", "all_zero", "--dry-run"])
            .execute(file.graph(), OutputFormat::Json)
            .await
            .unwrap();
        assert!(!file.save_if_changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_all_zero_removes_unpinned_state() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        parse::<OrphansCommand>(&["purge", "--mode", "all_zero"])
            .execute(file.graph(), OutputFormat::Table)
            .await
            .unwrap();

        let graph = file.graph();
        assert!(graph.get_state("char_b_v2").await.unwrap_err().is_not_found());
        assert_eq!(graph.get_current_state("char_b").await.unwrap().version, 1);
        assert_eq!(graph.store().counts().await.entities, 2);
    }

    #[tokio::test]
    async fn test_invalid_mode_fails() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        let result = parse::<OrphansCommand>(&["states", "--mode", "sometimes"])
            .execute(file.graph(), OutputFormat::Table)
            .await;
        assert!(result.is_err());
    }
}

// =============================================================================
// Review and Stats Commands
// =============================================================================

mod review_tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_from_cli() {
        let dir = seeded_dir().await;
        {
            let file = reopen(&dir).await;
            file.graph()
                .create_version(
                    "char_a",
                    version("Alice rewritten"),
                    &WriteContext::Session("s1".to_string()),
                )
                .await
                .unwrap();
            file.save_if_changed().await.unwrap();
        }

        let file = reopen(&dir).await;
        parse::<ReviewCommand>(&["diff", "s1", "entity", "char_a"])
            .execute(file.graph(), OutputFormat::Table)
            .await
            .unwrap();
        parse::<ReviewCommand>(&["rollback", "s1", "entity", "char_a", "--task", "cli undo"])
            .execute(file.graph(), OutputFormat::Json)
            .await
            .unwrap();
        assert!(file.save_if_changed().await.unwrap());

        let file = reopen(&dir).await;
        let current = file.graph().get_current_state("char_a").await.unwrap();
        assert_eq!(current.content, "Alice v1");
    }

    #[tokio::test]
    async fn test_bad_resource_type_fails() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        let result = parse::<ReviewCommand>(&["approve", "s1", "vertex", "char_a"])
            .execute(file.graph(), OutputFormat::Table)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stats_runs() {
        let dir = seeded_dir().await;
        let file = reopen(&dir).await;
        parse::<StatsCommand>(&[])
            .execute(file.graph(), OutputFormat::Table)
            .await
            .unwrap();
    }
}
