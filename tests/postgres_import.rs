use recipe_loader::config::{ConflictPolicy, LoadSettings};
use recipe_loader::import::{ImportCoordinator, recipes_plan, reviews_plan, user_relations_plan, users_plan};
use recipe_loader::shaper::RawRow;
use recipe_loader::test_support::{TestDatabase, TestDatabaseError, raw_row};
use sqlx::PgPool;
use std::sync::Arc;

async fn provision(test_name: &str) -> Option<TestDatabase> {
    match TestDatabase::new().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping {test_name}: no database available ({err})");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count rows")
}

fn settings(batch_size: usize) -> LoadSettings {
    LoadSettings {
        batch_size,
        workers: 3,
        conflicts: ConflictPolicy::Report,
    }
}

fn user(id: &str, gender: &str, age: &str, followers: &str) -> RawRow {
    raw_row(&[id, "Cook", gender, age, "1", "0", followers, ""])
}

fn recipe(id: &str, author: &str) -> RawRow {
    let mut cells = vec![""; 27];
    cells[0] = id;
    cells[1] = "Stew";
    cells[2] = author;
    cells[4] = "PT30M";
    cells[7] = "2019-07-01T12:00:00Z";
    cells[10] = "c(\"stew\", \"winter\")";
    cells[11] = "c(\"beef\", \"carrot\", \"beef\")";
    cells[12] = "4.25";
    cells[13] = "3";
    cells[14] = "512.3";
    cells[25] = "c(\"brown the beef\", \"simmer\")";
    cells[26] = "c(\"1\", \"2\", \"404\")";
    raw_row(&cells)
}

fn review(id: &str, recipe: &str, author: &str, rating: &str) -> RawRow {
    raw_row(&[id, recipe, author, "Cook", rating, "Tasty", "2020-02-02 08:00:00", "", "c(\"1\")"])
}

#[tokio::test]
async fn test_full_dataset_load_and_rerun() {
    let Some(test_db) = provision("full dataset load").await else {
        return;
    };
    let pool = test_db.pool_clone();
    let coordinator = ImportCoordinator::new(Arc::new(test_db.store(true)), settings(2));

    let users: Vec<RawRow> = vec![
        user("1", "Female", "30", "c(\"2\", \"3\")"),
        user("2", "Male", "44", "1"),
        user("3", "", "", "c(\"1\", \"77\")"),
    ];
    let recipes = vec![recipe("10", "1"), recipe("11", "2")];
    let reviews = vec![review("100", "10", "2", "5"), review("101", "11", "3", "4")];

    let report = coordinator.run(Arc::new(users_plan()), users.clone()).await;
    assert!(report.is_success());
    assert_eq!(report.accepted("users"), 3);

    let relations = coordinator.run(Arc::new(user_relations_plan()), users.clone()).await;
    assert_eq!(relations.accepted("user_followers"), 4);
    assert_eq!(relations.ignored("user_followers"), 1);

    let report = coordinator.run(Arc::new(recipes_plan()), recipes.clone()).await;
    assert!(report.is_success());
    assert_eq!(report.rows().committed, 2);
    assert_eq!(report.accepted("recipe_ingredients"), 4);
    assert_eq!(report.accepted("recipe_favorites"), 4);
    assert_eq!(report.ignored("recipe_favorites"), 2);

    let report = coordinator.run(Arc::new(reviews_plan()), reviews.clone()).await;
    assert!(report.is_success());
    assert_eq!(report.accepted("reviews"), 2);
    assert_eq!(report.accepted("review_likers"), 2);

    assert_eq!(count(&pool, "users").await, 3);
    assert_eq!(count(&pool, "user_followers").await, 4);
    assert_eq!(count(&pool, "recipes").await, 2);
    assert_eq!(count(&pool, "keywords").await, 4);
    assert_eq!(count(&pool, "recipe_instructions").await, 4);
    assert_eq!(count(&pool, "reviews").await, 2);

    let step: String = sqlx::query_scalar(
        "SELECT instruction_text FROM recipe_instructions WHERE recipe_id = 10 AND step_order = 2",
    )
    .fetch_one(&pool)
    .await
    .expect("step two");
    assert_eq!(step, "simmer");

    let rating: f64 = sqlx::query_scalar("SELECT aggregated_rating FROM recipes WHERE recipe_id = 10")
        .fetch_one(&pool)
        .await
        .expect("rating");
    assert!((rating - 4.25).abs() < f64::EPSILON);

    let rerun = coordinator.run(Arc::new(recipes_plan()), recipes).await;
    assert_eq!(rerun.rows().committed, 2);
    assert_eq!(rerun.accepted("recipes"), 0);
    assert_eq!(rerun.accepted("keywords"), 0);
    assert_eq!(rerun.ignored("recipes"), 2);
    assert_eq!(count(&pool, "recipes").await, 2);
    assert_eq!(count(&pool, "recipe_ingredients").await, 4);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn test_constraint_violation_skips_only_offending_row() {
    let Some(test_db) = provision("constraint isolation").await else {
        return;
    };
    let pool = test_db.pool_clone();
    let coordinator = ImportCoordinator::new(Arc::new(test_db.store(false)), settings(10));

    let users = vec![
        user("1", "Female", "30", ""),
        user("2", "Robot", "30", ""),
        user("3", "Male", "200", ""),
        user("4", "Male", "52", ""),
    ];
    let report = coordinator.run(Arc::new(users_plan()), users).await;

    assert!(report.is_success());
    assert_eq!(report.partitions(), 1);
    assert_eq!(report.rows().committed, 2);
    assert_eq!(report.rows().skipped_parse, 2);
    assert_eq!(report.rows().settled(), 4);

    let ids: Vec<i32> = sqlx::query_scalar("SELECT author_id FROM users ORDER BY author_id")
        .fetch_all(&pool)
        .await
        .expect("user ids");
    assert_eq!(ids, vec![1, 4]);

    let reviews = vec![review("200", "999", "1", "5"), review("201", "999", "4", "9")];
    let report = coordinator.run(Arc::new(reviews_plan()), reviews).await;
    assert!(report.is_success());
    assert_eq!(report.rows().committed, 0);
    assert_eq!(report.rows().skipped_parse, 2);
    assert_eq!(count(&pool, "reviews").await, 0);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn test_unreachable_server_aborts_every_partition() {
    let Some(test_db) = provision("unreachable server").await else {
        return;
    };

    let options = test_db.store(true).options().clone().port(1);
    let store = recipe_loader::store::PgStore::new(options, true);
    let coordinator = ImportCoordinator::new(Arc::new(store), settings(2));

    let users: Vec<RawRow> = (1..=5).map(|id| user(&id.to_string(), "Male", "20", "")).collect();
    let report = coordinator.run(Arc::new(users_plan()), users).await;

    assert!(!report.is_success());
    assert_eq!(report.failed_partitions(), &[0, 1, 2]);
    assert_eq!(report.rows().skipped_connection, 5);
    assert_eq!(report.rows().committed, 0);

    test_db.close().await.expect("failed to drop test database");
}
