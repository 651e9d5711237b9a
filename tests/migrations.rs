mod common;

use anonchat_store::db::migrations::{column_exists, table_exists, REVISIONS};
use anonchat_store::db::{MessageKind, StepOutcome};
use common::{catalog, interest_names, setup_test_db};

const TABLES: [&str; 9] = [
    "users",
    "active_chats",
    "ended_chats",
    "messages",
    "user_state",
    "user_profiles",
    "interests",
    "user_interests",
    "user_ratings",
];

/// Layout shipped before media storage, profiles and interests existed.
const OLD_SCHEMA: &[&str] = &[
    r#"CREATE TABLE users (
        user_id BIGINT PRIMARY KEY,
        username VARCHAR(255),
        first_name VARCHAR(255),
        last_name VARCHAR(255),
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE active_chats (
        chat_id SERIAL PRIMARY KEY,
        user_id_1 BIGINT REFERENCES users(user_id),
        user_id_2 BIGINT REFERENCES users(user_id),
        started_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(user_id_1),
        UNIQUE(user_id_2)
    )"#,
    r#"CREATE TABLE messages (
        id SERIAL PRIMARY KEY,
        chat_id INTEGER REFERENCES active_chats(chat_id) ON DELETE SET NULL,
        sender_id BIGINT REFERENCES users(user_id),
        content TEXT,
        sent_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
];

const OLD_USER_STATE: &str = r#"CREATE TABLE user_state (
    user_id BIGINT PRIMARY KEY REFERENCES users(user_id),
    is_searching BOOLEAN DEFAULT FALSE,
    main_message_id BIGINT,
    pin_message_id BIGINT,
    last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)"#;

async fn apply(test_db: &common::TestDb, statements: &[&str]) {
    let mut conn = test_db.connection().await;
    for stmt in statements {
        sqlx::query(stmt).execute(&mut conn).await.expect("Failed to apply setup statement");
    }
}

#[test_log::test(tokio::test)]
async fn test_fresh_database_startup() {
    let Some(test_db) = setup_test_db().await else { return };

    let report = test_db.db.run_startup().await;

    assert!(report.is_clean(), "failed steps: {:?}", report.failed());
    assert_eq!(report.applied(), vec!["create_tables"]);
    assert_eq!(report.steps.len(), REVISIONS.len() + 1);
    assert_eq!(report.reconcile.tags_created, 3);

    let mut conn = test_db.connection().await;
    for table in TABLES {
        assert!(table_exists(&mut conn, table).await.unwrap(), "{} missing", table);
    }
    assert!(column_exists(&mut conn, "messages", "local_file_path").await.unwrap());
    assert!(column_exists(&mut conn, "user_state", "profile_setup_step").await.unwrap());

    // Exactly the canonical interests, nothing legacy
    assert_eq!(interest_names(test_db.pool()).await, vec!["chat", "flirt", "other"]);

    test_db.cleanup().await;
}

#[test_log::test(tokio::test)]
async fn test_second_startup_is_noop() {
    let Some(test_db) = setup_test_db().await else { return };

    let first = test_db.db.run_startup().await;
    assert!(first.is_clean());
    let after_first = catalog(test_db.pool()).await;

    let second = test_db.db.run_startup().await;
    assert!(second.is_noop(), "second run changed something: {:?}", second);
    assert!(second
        .steps
        .iter()
        .all(|(_, outcome)| *outcome == StepOutcome::Skipped));
    assert_eq!(catalog(test_db.pool()).await, after_first);
    assert_eq!(interest_names(test_db.pool()).await.len(), 3);

    test_db.cleanup().await;
}

#[test_log::test(tokio::test)]
async fn test_upgrade_keeps_existing_rows() {
    let Some(test_db) = setup_test_db().await else { return };

    apply(&test_db, OLD_SCHEMA).await;
    apply(
        &test_db,
        &[
            OLD_USER_STATE,
            "INSERT INTO users (user_id, username) VALUES (1, 'alice'), (2, 'bob')",
            "INSERT INTO active_chats (user_id_1, user_id_2) VALUES (1, 2)",
            "INSERT INTO messages (chat_id, sender_id, content) VALUES (1, 1, 'hello from before')",
            "INSERT INTO user_state (user_id, is_searching) VALUES (2, TRUE)",
        ],
    )
    .await;

    let report = test_db.db.run_startup().await;

    assert!(report.is_clean(), "failed steps: {:?}", report.failed());
    assert_eq!(
        report.applied(),
        vec![
            "create_tables",
            "messages_media_storage",
            "messages_media_type",
            "messages_local_file",
            "user_state_profile_setup",
        ]
    );

    // Old rows are readable through the new columns and their defaults
    let message = test_db.db.get_message(1).await.unwrap().expect("message survived");
    assert_eq!(message.content.as_deref(), Some("hello from before"));
    assert_eq!(message.kind, MessageKind::Text);
    assert!(message.file_content.is_none());
    assert!(!message.has_media());

    assert_eq!(test_db.db.get_searching_users().await.unwrap(), vec![2]);
    let progress = test_db.db.get_profile_setup_state(2).await.unwrap();
    assert_eq!(progress.step, 0);

    let chat = test_db.db.get_active_chat(2).await.unwrap().expect("chat survived");
    assert_eq!(chat.partner_id, 1);

    test_db.cleanup().await;
}

#[test_log::test(tokio::test)]
async fn test_upgrade_revisions_are_idempotent() {
    let Some(test_db) = setup_test_db().await else { return };

    apply(&test_db, OLD_SCHEMA).await;
    apply(&test_db, &[OLD_USER_STATE]).await;

    // Upgrade pass alone adds the columns and the new tables
    let report = test_db.db.migrate_tables().await;
    assert!(report.is_clean(), "failed steps: {:?}", report.failed());
    assert_eq!(report.applied().len(), REVISIONS.len());
    assert_eq!(report.reconcile.tags_created, 3);
    let after_first = catalog(test_db.pool()).await;

    let again = test_db.db.migrate_tables().await;
    assert!(again.is_noop());
    assert_eq!(catalog(test_db.pool()).await, after_first);

    test_db.cleanup().await;
}

#[test_log::test(tokio::test)]
async fn test_failed_step_does_not_stop_later_steps() {
    let Some(test_db) = setup_test_db().await else { return };

    apply(&test_db, OLD_SCHEMA).await;
    // A view cannot be altered or indexed, so every step touching it fails
    apply(
        &test_db,
        &["CREATE VIEW user_state AS SELECT user_id, FALSE AS is_searching FROM users"],
    )
    .await;

    let report = test_db.db.run_startup().await;

    assert_eq!(report.failed(), vec!["create_tables", "user_state_profile_setup"]);
    assert!(report.applied().contains(&"messages_media_storage"));
    assert!(report.applied().contains(&"user_profiles_table"));
    assert!(report.applied().contains(&"interests_tables"));
    assert!(report.applied().contains(&"user_ratings_table"));

    let mut conn = test_db.connection().await;
    assert!(column_exists(&mut conn, "messages", "file_content").await.unwrap());
    assert!(table_exists(&mut conn, "user_ratings").await.unwrap());
    assert!(!column_exists(&mut conn, "user_state", "profile_setup_state").await.unwrap());
    // Rolled back with the rest of the create pass
    assert!(!table_exists(&mut conn, "ended_chats").await.unwrap());

    assert_eq!(interest_names(test_db.pool()).await, vec!["chat", "flirt", "other"]);

    test_db.cleanup().await;
}

#[test_log::test(tokio::test)]
async fn test_concurrent_startups_converge() {
    let Some(test_db) = setup_test_db().await else { return };

    apply(&test_db, OLD_SCHEMA).await;
    apply(&test_db, &[OLD_USER_STATE]).await;

    // Racing instances may lose individual steps; the next start finishes the job
    let (_, _) = tokio::join!(test_db.db.run_startup(), test_db.db.run_startup());
    let settled = test_db.db.run_startup().await;
    assert!(settled.is_clean(), "failed steps: {:?}", settled.failed());

    let converged = catalog(test_db.pool()).await;
    let final_run = test_db.db.run_startup().await;
    assert!(final_run.is_noop());
    assert_eq!(catalog(test_db.pool()).await, converged);
    assert_eq!(interest_names(test_db.pool()).await, vec!["chat", "flirt", "other"]);

    let mut conn = test_db.connection().await;
    for table in TABLES {
        assert!(table_exists(&mut conn, table).await.unwrap(), "{} missing", table);
    }

    test_db.cleanup().await;
}
