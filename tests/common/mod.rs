#![allow(dead_code)]

use anonchat_store::db::{DbOperations, User, UserId};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, PgConnection, PgPool};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// A database created for a single test and dropped by [`TestDb::cleanup`].
pub struct TestDb {
    pub db: DbOperations,
    admin: PgConnectOptions,
    name: String,
}

/// Creates an empty database on the server named by `TEST_DATABASE_URL`.
/// Returns `None` when the variable is unset so tests can be skipped.
pub async fn setup_test_db() -> Option<TestDb> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) if !url.is_empty() => url,
        _ => {
            eprintln!("TEST_DATABASE_URL not set, skipping database test");
            return None;
        }
    };

    let admin = PgConnectOptions::from_str(&url).expect("Invalid TEST_DATABASE_URL");
    let name = format!("anonchat_test_{}", Uuid::new_v4().simple());

    let mut conn = admin.connect().await.expect("Failed to connect to test server");
    sqlx::query(&format!("CREATE DATABASE {}", name))
        .execute(&mut conn)
        .await
        .expect("Failed to create test database");
    conn.close().await.ok();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(admin.clone().database(&name))
        .await
        .expect("Failed to connect to test database");

    Some(TestDb {
        db: DbOperations::new(Arc::new(pool)),
        admin,
        name,
    })
}

impl TestDb {
    pub fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    /// A separate connection to the test database, for raw setup statements.
    pub async fn connection(&self) -> PgConnection {
        self.admin
            .clone()
            .database(&self.name)
            .connect()
            .await
            .expect("Failed to open connection")
    }

    pub async fn cleanup(self) {
        self.db.disconnect().await;
        let mut conn = self.admin.connect().await.expect("Failed to connect to test server");
        sqlx::query(&format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", self.name))
            .execute(&mut conn)
            .await
            .expect("Failed to drop test database");
        conn.close().await.ok();
    }
}

/// Runs the full startup sequence and asserts every step succeeded.
pub async fn migrated(test_db: &TestDb) {
    let report = test_db.db.run_startup().await;
    assert!(report.is_clean(), "startup failed: {:?}", report.failed());
}

pub async fn add_users(db: &DbOperations, ids: &[UserId]) {
    for id in ids {
        db.add_user(&User::new(*id).with_username(format!("user{}", id)))
            .await
            .expect("Failed to add user");
    }
}

/// Interest tag names currently stored, sorted.
pub async fn interest_names(pool: &PgPool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM interests ORDER BY name")
        .fetch_all(pool)
        .await
        .expect("Failed to list interests")
}

/// Tag names held by `user_id`, sorted.
pub async fn tags_of(pool: &PgPool, user_id: UserId) -> Vec<String> {
    sqlx::query_scalar(
        r#"
        SELECT i.name FROM user_interests ui
        JOIN interests i ON i.id = ui.interest_id
        WHERE ui.user_id = $1
        ORDER BY i.name
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .expect("Failed to list user tags")
}

/// Gives `user_id` the tag named `name`, creating the tag if necessary.
pub async fn tag_user(pool: &PgPool, user_id: UserId, name: &str) {
    sqlx::query("INSERT INTO interests (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await
        .expect("Failed to insert tag");
    sqlx::query(
        r#"
        INSERT INTO user_interests (user_id, interest_id)
        SELECT $1, id FROM interests WHERE name = $2
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(name)
    .execute(pool)
    .await
    .expect("Failed to tag user");
}

/// `(table, column, data_type)` for every column in the current schema.
pub async fn catalog(pool: &PgPool) -> Vec<(String, String, String)> {
    sqlx::query_as(
        r#"
        SELECT table_name::TEXT, column_name::TEXT, data_type::TEXT
        FROM information_schema.columns
        WHERE table_schema = current_schema()
        ORDER BY table_name, column_name
        "#,
    )
    .fetch_all(pool)
    .await
    .expect("Failed to read catalog")
}
