//! Additive, re-runnable schema migrations.
//!
//! There is no schema version table. Each revision probes `information_schema`
//! for what it introduces and only alters the schema when something is missing,
//! so the whole sequence can run on every startup and from several processes at
//! once. A failing revision is rolled back and logged; later revisions still run.

use serde::Serialize;
use sqlx::{Connection, PgConnection, PgPool};
use tracing::{error, info, warn};

use crate::db::schema::{self, ColumnSpec, TableSpec};
use crate::db::taxonomy::{reconcile_interests, ReconcileReport};

#[derive(Debug, Clone, Copy)]
pub enum Change {
    AddColumns(&'static [ColumnSpec]),
    CreateTables {
        tables: &'static [TableSpec],
        reconcile_interests: bool,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Revision {
    pub name: &'static str,
    pub change: Change,
}

/// Schema revisions in the order they shipped.
pub const REVISIONS: &[Revision] = &[
    Revision {
        name: "messages_media_storage",
        change: Change::AddColumns(schema::MESSAGE_MEDIA_STORAGE),
    },
    Revision {
        name: "messages_media_type",
        change: Change::AddColumns(schema::MESSAGE_MEDIA_TYPE),
    },
    Revision {
        name: "messages_local_file",
        change: Change::AddColumns(schema::MESSAGE_LOCAL_FILE),
    },
    Revision {
        name: "user_state_profile_setup",
        change: Change::AddColumns(schema::USER_STATE_PROFILE_SETUP),
    },
    Revision {
        name: "user_profiles_table",
        change: Change::CreateTables {
            tables: &[schema::USER_PROFILES],
            reconcile_interests: false,
        },
    },
    Revision {
        name: "interests_tables",
        change: Change::CreateTables {
            tables: &[schema::INTERESTS, schema::USER_INTERESTS],
            reconcile_interests: true,
        },
    },
    Revision {
        name: "user_ratings_table",
        change: Change::CreateTables {
            tables: &[schema::USER_RATINGS],
            reconcile_interests: false,
        },
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub steps: Vec<(&'static str, StepOutcome)>,
    pub reconcile: ReconcileReport,
}

impl MigrationReport {
    fn record(&mut self, step: &'static str, outcome: StepOutcome) {
        self.steps.push((step, outcome));
    }

    fn merge_reconcile(&mut self, other: ReconcileReport) {
        self.reconcile.tags_created += other.tags_created;
        self.reconcile.associations_added += other.associations_added;
        self.reconcile.associations_removed += other.associations_removed;
        self.reconcile.tags_removed += other.tags_removed;
    }

    pub fn applied(&self) -> Vec<&'static str> {
        self.with_outcome(|o| matches!(o, StepOutcome::Applied))
    }

    pub fn failed(&self) -> Vec<&'static str> {
        self.with_outcome(|o| matches!(o, StepOutcome::Failed(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.failed().is_empty()
    }

    /// True when the run changed neither the schema nor any interest rows.
    pub fn is_noop(&self) -> bool {
        self.is_clean() && self.applied().is_empty() && self.reconcile.is_noop()
    }

    fn with_outcome(&self, pred: impl Fn(&StepOutcome) -> bool) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(name, _)| *name)
            .collect()
    }
}

pub async fn table_exists(conn: &mut PgConnection, table: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = $1
        )
        "#,
    )
    .bind(table)
    .fetch_one(conn)
    .await
}

pub async fn column_exists(
    conn: &mut PgConnection,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
        )
        "#,
    )
    .bind(table)
    .bind(column)
    .fetch_one(conn)
    .await
}

async fn missing_columns(
    conn: &mut PgConnection,
    columns: &[ColumnSpec],
) -> Result<Vec<ColumnSpec>, sqlx::Error> {
    let mut missing = Vec::new();
    for column in columns {
        if !column_exists(&mut *conn, column.table, column.name).await? {
            missing.push(*column);
        }
    }
    Ok(missing)
}

/// Creates `table` if it is missing and makes sure its indexes exist.
/// Returns whether the table had to be created.
async fn ensure_table(conn: &mut PgConnection, table: &TableSpec) -> Result<bool, sqlx::Error> {
    let created = if table_exists(&mut *conn, table.name).await? {
        false
    } else {
        sqlx::query(table.create).execute(&mut *conn).await?;
        info!(table = table.name, "Created table");
        true
    };
    for stmt in table.follow_up {
        sqlx::query(stmt).execute(&mut *conn).await?;
    }
    Ok(created)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconcile {
    Always,
    WhenCreated,
    Never,
}

/// Creates the missing tables in one transaction, optionally followed by the
/// interest reconciliation inside the same transaction.
async fn ensure_tables(
    pool: &PgPool,
    tables: &[TableSpec],
    reconcile: Reconcile,
) -> Result<(bool, ReconcileReport), sqlx::Error> {
    let mut transaction = pool.begin().await?;

    let result = async {
        let mut created = false;
        for table in tables {
            created |= ensure_table(&mut transaction, table).await?;
        }
        let report = match reconcile {
            Reconcile::Always => reconcile_interests(&mut transaction).await?,
            Reconcile::WhenCreated if created => reconcile_interests(&mut transaction).await?,
            _ => ReconcileReport::default(),
        };
        Ok::<_, sqlx::Error>((created, report))
    }
    .await;

    match result {
        Ok(outcome) => {
            transaction.commit().await?;
            Ok(outcome)
        }
        Err(e) => {
            transaction.rollback().await?;
            Err(e)
        }
    }
}

/// Fresh-install pass: creates every missing table and normalises any interest
/// rows that came with the database, all in one transaction. Returns whether
/// any table was created.
pub async fn create_tables(pool: &PgPool) -> Result<(bool, ReconcileReport), sqlx::Error> {
    let outcome = ensure_tables(pool, schema::ALL_TABLES, Reconcile::Always).await?;
    info!("Database tables created or already exist");
    Ok(outcome)
}

async fn add_statements(
    conn: &mut PgConnection,
    columns: &[ColumnSpec],
    sql: fn(&ColumnSpec) -> String,
) -> Result<(), sqlx::Error> {
    let mut transaction = conn.begin().await?;
    for column in columns {
        if let Err(e) = sqlx::query(&sql(column)).execute(&mut *transaction).await {
            transaction.rollback().await?;
            return Err(e);
        }
    }
    transaction.commit().await
}

/// Returns `Ok(true)` when at least one column was added.
async fn add_columns(pool: &PgPool, columns: &[ColumnSpec]) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let missing = missing_columns(&mut conn, columns).await?;
    if missing.is_empty() {
        return Ok(false);
    }

    let primary = match add_statements(&mut conn, &missing, ColumnSpec::add_if_missing_sql).await {
        Ok(()) => return Ok(true),
        Err(e) => e,
    };

    // Another instance may have added the columns while we were probing.
    let still_missing = missing_columns(&mut conn, &missing).await?;
    if still_missing.is_empty() {
        warn!(error = %primary, "Column add failed but columns are present, treating as applied");
        return Ok(true);
    }

    warn!(error = %primary, "Retrying column add without IF NOT EXISTS");
    if let Err(fallback) = add_statements(&mut conn, &still_missing, ColumnSpec::add_sql).await {
        if missing_columns(&mut conn, &still_missing).await?.is_empty() {
            return Ok(true);
        }
        return Err(fallback);
    }
    Ok(true)
}

async fn apply_revision(
    pool: &PgPool,
    revision: &Revision,
) -> Result<(bool, ReconcileReport), sqlx::Error> {
    match revision.change {
        Change::AddColumns(columns) => Ok((add_columns(pool, columns).await?, ReconcileReport::default())),
        Change::CreateTables {
            tables,
            reconcile_interests,
        } => {
            let reconcile = if reconcile_interests {
                Reconcile::WhenCreated
            } else {
                Reconcile::Never
            };
            ensure_tables(pool, tables, reconcile).await
        }
    }
}

/// Upgrade pass: applies every revision whose objects are missing.
pub async fn migrate_tables(pool: &PgPool) -> MigrationReport {
    let mut report = MigrationReport::default();
    run_revisions(pool, &mut report).await;
    report
}

async fn run_revisions(pool: &PgPool, report: &mut MigrationReport) {
    for revision in REVISIONS {
        match apply_revision(pool, revision).await {
            Ok((true, reconciled)) => {
                info!(revision = revision.name, "Migration applied");
                report.merge_reconcile(reconciled);
                report.record(revision.name, StepOutcome::Applied);
            }
            Ok((false, _)) => report.record(revision.name, StepOutcome::Skipped),
            Err(e) => {
                error!(revision = revision.name, error = %e, "Migration failed, continuing with next revision");
                report.record(revision.name, StepOutcome::Failed(e.to_string()));
            }
        }
    }
}

/// Full startup sequence: create pass followed by the column/table revisions.
pub async fn run_startup(pool: &PgPool) -> MigrationReport {
    let mut report = MigrationReport::default();

    match create_tables(pool).await {
        Ok((created, reconciled)) => {
            report.merge_reconcile(reconciled);
            let outcome = if created {
                StepOutcome::Applied
            } else {
                StepOutcome::Skipped
            };
            report.record("create_tables", outcome);
        }
        Err(e) => {
            error!(error = %e, "Creating tables failed, continuing with migrations");
            report.record("create_tables", StepOutcome::Failed(e.to_string()));
        }
    }

    run_revisions(pool, &mut report).await;

    if report.is_clean() {
        info!(applied = ?report.applied(), "Schema is up to date");
    } else {
        warn!(failed = ?report.failed(), "Schema migration finished with failures");
    }
    report
}
