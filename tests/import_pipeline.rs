use recipe_loader::config::{ConflictPolicy, LoadSettings};
use recipe_loader::import::{
    DatasetPaths, ImportCoordinator, recipes_plan, reviews_plan, user_relations_plan, users_plan,
};
use recipe_loader::shaper::RawRow;
use recipe_loader::source::SourceOptions;
use recipe_loader::test_support::{MemoryStore, raw_row};
use std::sync::Arc;
use std::time::Duration;

fn settings(batch_size: usize, workers: usize) -> LoadSettings {
    LoadSettings {
        batch_size,
        workers,
        conflicts: ConflictPolicy::Ignore,
    }
}

fn coordinator(store: &MemoryStore, settings: LoadSettings) -> ImportCoordinator<MemoryStore> {
    ImportCoordinator::new(Arc::new(store.clone()), settings)
}

fn user(id: &str, followers: &str, following: &str) -> RawRow {
    raw_row(&[id, "Cook", "Female", "34", "2", "1", followers, following])
}

fn users(ids: std::ops::RangeInclusive<i64>) -> Vec<RawRow> {
    ids.map(|id| user(&id.to_string(), "", "")).collect()
}

fn recipe(id: &str, author: &str, keywords: &str, steps: &str, favorites: &str) -> RawRow {
    let mut cells = vec![""; 27];
    cells[0] = id;
    cells[1] = "Soup";
    cells[2] = author;
    cells[7] = "2020-01-02T03:04:05Z";
    cells[10] = keywords;
    cells[11] = "c(\"water\", \"salt\")";
    cells[12] = "4.5";
    cells[14] = "120.5";
    cells[25] = steps;
    cells[26] = favorites;
    raw_row(&cells)
}

#[tokio::test]
async fn test_load_users_and_rerun_is_idempotent() {
    let store = MemoryStore::new();
    let coordinator = coordinator(&store, settings(2, 3));
    let plan = Arc::new(users_plan());

    let first = coordinator.run(Arc::clone(&plan), users(1..=5)).await;
    assert!(first.is_success());
    assert_eq!(first.partitions(), 3);
    assert_eq!(first.rows().total, 5);
    assert_eq!(first.rows().committed, 5);
    assert_eq!(first.accepted("users"), 5);
    assert_eq!(store.row_count("users"), 5);

    let second = coordinator.run(plan, users(1..=5)).await;
    assert!(second.is_success());
    assert_eq!(second.rows().committed, 5);
    assert_eq!(second.accepted("users"), 0);
    assert_eq!(store.row_count("users"), 5);
}

#[tokio::test]
async fn test_failed_partition_does_not_stop_siblings() {
    let store = MemoryStore::new();
    store.fail_open(1);
    let coordinator = coordinator(&store, settings(2, 2));

    let report = coordinator.run(Arc::new(users_plan()), users(1..=6)).await;

    assert!(!report.is_success());
    assert_eq!(report.failed_partitions(), &[1]);
    assert_eq!(report.rows().committed, 4);
    assert_eq!(report.rows().skipped_connection, 2);
    assert_eq!(report.rows().settled(), report.rows().total);
    for id in [1, 2, 5, 6] {
        assert!(store.contains("users", id), "user {id} should be loaded");
    }
    assert!(!store.contains("users", 3));
    assert!(!store.contains("users", 4));
}

#[tokio::test]
async fn test_rejected_row_is_isolated() {
    let store = MemoryStore::new();
    store.reject_id("users", 3);
    let coordinator = coordinator(&store, settings(4, 1));

    let report = coordinator.run(Arc::new(users_plan()), users(1..=4)).await;

    assert!(report.is_success());
    assert_eq!(report.rows().committed, 3);
    assert_eq!(report.rows().skipped_parse, 1);
    assert_eq!(report.accepted("users"), 3);
    assert!(store.contains("users", 1));
    assert!(store.contains("users", 2));
    assert!(!store.contains("users", 3));
    assert!(store.contains("users", 4));
}

#[tokio::test]
async fn test_disconnect_during_replay_keeps_committed_rows() {
    let store = MemoryStore::new();
    store.reject_id("users", 2);
    store.disconnect_after(0, 2);
    let coordinator = coordinator(&store, settings(4, 1));

    let report = coordinator.run(Arc::new(users_plan()), users(1..=4)).await;

    assert_eq!(report.failed_partitions(), &[0]);
    assert_eq!(report.rows().committed, 2);
    assert_eq!(report.rows().skipped_parse, 1);
    assert_eq!(report.rows().skipped_connection, 1);
    assert_eq!(report.rows().settled(), 4);
    assert!(store.contains("users", 1));
    assert!(store.contains("users", 3));
    assert!(!store.contains("users", 4));
}

#[tokio::test]
async fn test_rows_without_usable_key_are_skipped() {
    let store = MemoryStore::new();
    let coordinator = coordinator(&store, settings(10, 2));

    let rows = vec![
        user("1", "", ""),
        user("", "", ""),
        user("abc", "", ""),
        user("3000000000", "", ""),
        user("2.0", "", ""),
    ];
    let report = coordinator.run(Arc::new(users_plan()), rows).await;

    assert!(report.is_success());
    assert_eq!(report.rows().total, 5);
    assert_eq!(report.rows().committed, 2);
    assert_eq!(report.rows().skipped_parse, 3);
    assert!(store.contains("users", 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_count_bounds_open_sessions() {
    let store = MemoryStore::with_write_delay(Duration::from_millis(20));
    let coordinator = coordinator(&store, settings(1, 3));

    let report = coordinator.run(Arc::new(users_plan()), users(1..=12)).await;

    assert_eq!(report.partitions(), 12);
    assert_eq!(report.rows().committed, 12);
    assert!(store.max_concurrent_sessions() <= 3);
    assert!(store.max_concurrent_sessions() >= 1);
}

#[tokio::test]
async fn test_relation_edges_filtered_against_users() {
    let store = MemoryStore::new();
    let coordinator = coordinator(&store, settings(10, 2));
    let rows = vec![
        user("1", "c(\"2\", \"99\", \"1\")", "[\"3\"]"),
        user("2", "1", ""),
        user("3", "", "c(\"1\", \"2\")"),
    ];

    coordinator.run(Arc::new(users_plan()), rows.clone()).await;
    let report = coordinator.run(Arc::new(user_relations_plan()), rows).await;

    assert!(report.is_success());
    assert_eq!(report.accepted("user_followers"), 2);
    assert_eq!(report.accepted("user_following"), 3);

    let followers = store.rows("user_followers");
    assert!(followers.contains(&vec![Some("1".to_string()), Some("2".to_string())]));
    assert!(!followers.iter().any(|edge| edge[1].as_deref() == Some("99")));
    assert!(!followers.iter().any(|edge| edge[0] == edge[1]));
}

#[tokio::test]
async fn test_report_policy_counts_ignored_rows() {
    let store = MemoryStore::new();
    let coordinator = coordinator(
        &store,
        LoadSettings {
            conflicts: ConflictPolicy::Report,
            ..settings(10, 1)
        },
    );

    coordinator.run(Arc::new(users_plan()), users(1..=2)).await;
    let recipes = vec![
        recipe("10", "1", "c(\"soup\", \"easy\")", "c(\"boil\", \"serve\")", "c(\"1\", \"2\", \"7\")"),
        recipe("11", "2", "soup", "stir", ""),
    ];
    let first = coordinator.run(Arc::new(recipes_plan()), recipes.clone()).await;

    assert_eq!(first.accepted("recipes"), 2);
    assert_eq!(first.accepted("keywords"), 3);
    assert_eq!(first.accepted("recipe_ingredients"), 4);
    assert_eq!(first.accepted("recipe_instructions"), 3);
    assert_eq!(first.accepted("recipe_favorites"), 2);
    assert_eq!(first.ignored("recipe_favorites"), 1);

    let second = coordinator.run(Arc::new(recipes_plan()), recipes).await;
    assert_eq!(second.accepted("recipes"), 0);
    assert_eq!(second.ignored("recipes"), 2);
    assert_eq!(second.ignored("recipe_instructions"), 3);
    assert_eq!(second.rows().committed, 2);
}

#[tokio::test]
async fn test_instruction_steps_are_numbered_from_one() {
    let store = MemoryStore::new();
    let coordinator = coordinator(&store, settings(10, 1));

    coordinator.run(Arc::new(users_plan()), users(1..=1)).await;
    coordinator
        .run(
            Arc::new(recipes_plan()),
            vec![recipe("10", "1", "", "c(\"chop\", \"fry\", \"eat\")", "")],
        )
        .await;

    let steps = store.rows("recipe_instructions");
    assert_eq!(steps.len(), 3);
    assert_eq!(
        steps[0],
        vec![Some("10".to_string()), Some("1".to_string()), Some("chop".to_string())]
    );
    assert_eq!(steps[2][1].as_deref(), Some("3"));
}

#[tokio::test]
async fn test_run_dataset_loads_in_reference_order() {
    let dir = tempfile::tempdir().unwrap();

    let users_csv = dir.path().join("users.csv");
    std::fs::write(
        &users_csv,
        "AuthorId,AuthorName,Gender,Age,Followers,Following,FollowerUsers,FollowingUsers\n\
         1,Ann,Female,30,1,1,\"c(\"\"2\"\")\",\"c(\"\"2\"\")\"\n\
         2,Bo,Male,41,1,1,\"c(\"\"1\"\")\",\"c(\"\"1\"\")\"\n",
    )
    .unwrap();

    let mut recipe_cells = vec![String::new(); 27];
    recipe_cells[0] = "10".to_string();
    recipe_cells[1] = "Bread".to_string();
    recipe_cells[2] = "1".to_string();
    recipe_cells[10] = "bread".to_string();
    recipe_cells[25] = "\"c(\"\"knead\"\", \"\"bake\"\")\"".to_string();
    recipe_cells[26] = "2".to_string();
    let header = (0..27).map(|i| format!("c{i}")).collect::<Vec<_>>().join(",");
    let recipes_csv = dir.path().join("recipes.csv");
    std::fs::write(&recipes_csv, format!("{header}\n{}\n", recipe_cells.join(","))).unwrap();

    let reviews_csv = dir.path().join("reviews.csv");
    std::fs::write(
        &reviews_csv,
        "ReviewId,RecipeId,AuthorId,AuthorName,Rating,Review,DateSubmitted,DateModified,Likes\n\
         100,10,2,Bo,5,Great,2021-03-04 10:00:00,2021-03-05,\"c(\"\"1\"\", \"\"42\"\")\"\n\
         ,10,2,Bo,4,No id,,,\n",
    )
    .unwrap();

    let store = MemoryStore::new();
    let coordinator = coordinator(&store, settings(100, 2));
    let paths = DatasetPaths {
        users: Some(users_csv),
        recipes: Some(recipes_csv),
        reviews: Some(reviews_csv),
    };

    let summary = coordinator
        .run_dataset(&paths, SourceOptions::default())
        .await
        .unwrap();

    assert!(summary.is_success());
    let plans: Vec<&str> = summary.reports.iter().map(|report| report.plan()).collect();
    assert_eq!(plans, vec!["users", "user_relations", "recipes", "reviews"]);
    assert_eq!(summary.inputs.len(), 3);

    assert_eq!(store.row_count("users"), 2);
    assert_eq!(store.row_count("user_followers"), 2);
    assert_eq!(store.row_count("recipe_instructions"), 2);
    assert_eq!(store.row_count("recipe_favorites"), 1);
    assert!(store.contains("reviews", 100));

    let reviews = summary.report(reviews_plan().name).unwrap();
    assert_eq!(reviews.rows().skipped_parse, 1);
    assert_eq!(reviews.accepted("review_likers"), 1);

    let json = summary.to_json().unwrap();
    assert!(json.contains("\"plan\": \"reviews\""));
}

#[tokio::test]
async fn test_run_dataset_skips_missing_inputs() {
    let store = MemoryStore::new();
    let coordinator = coordinator(&store, settings(10, 1));

    let summary = coordinator
        .run_dataset(&DatasetPaths::default(), SourceOptions::default())
        .await
        .unwrap();

    assert!(summary.reports.is_empty());
    assert!(summary.is_success());
}

#[tokio::test]
async fn test_run_dataset_fails_on_unreadable_input() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let coordinator = coordinator(&store, settings(10, 1));
    let paths = DatasetPaths {
        users: Some(dir.path().join("missing.csv")),
        ..DatasetPaths::default()
    };

    assert!(coordinator.run_dataset(&paths, SourceOptions::default()).await.is_err());
    assert_eq!(store.row_count("users"), 0);
}

#[tokio::test]
async fn test_unreadable_input_fails_before_any_plan_runs() {
    let dir = tempfile::tempdir().unwrap();
    let users_csv = dir.path().join("users.csv");
    std::fs::write(
        &users_csv,
        "AuthorId,AuthorName,Gender,Age,Followers,Following,FollowerUsers,FollowingUsers\n\
         1,Ann,Female,30,0,0,,\n\
         2,Bo,Male,41,0,0,,\n",
    )
    .unwrap();

    let store = MemoryStore::new();
    let coordinator = coordinator(&store, settings(10, 1));
    let paths = DatasetPaths {
        users: Some(users_csv),
        recipes: Some(dir.path().join("missing_recipes.csv")),
        reviews: None,
    };

    let result = coordinator.run_dataset(&paths, SourceOptions::default()).await;

    assert!(matches!(
        result,
        Err(recipe_loader::error::LoaderError::Source(
            recipe_loader::error::SourceError::Io { .. }
        ))
    ));
    assert_eq!(store.row_count("users"), 0);
}
