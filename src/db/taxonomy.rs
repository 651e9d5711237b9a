//! Interest taxonomy and reconciliation of legacy interest tags.
//!
//! Interests used to be free-form tags named by their (Russian) label. They are
//! now a fixed set of three canonical tags keyed by a stable identifier stored in
//! `interests.name`. [`reconcile_interests`] moves every user holding a legacy tag
//! onto the matching canonical tag and retires the legacy rows. It is safe to run
//! any number of times: once no legacy rows remain it changes nothing.

use serde::Serialize;
use sqlx::PgConnection;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalInterest {
    Flirt,
    Chat,
    /// Absorbs every legacy tag without an explicit mapping.
    Other,
}

impl CanonicalInterest {
    pub const ALL: [CanonicalInterest; 3] = [
        CanonicalInterest::Flirt,
        CanonicalInterest::Chat,
        CanonicalInterest::Other,
    ];

    pub const CATCH_ALL: CanonicalInterest = CanonicalInterest::Other;

    /// Stable key stored in `interests.name`.
    pub fn key(&self) -> &'static str {
        match self {
            CanonicalInterest::Flirt => "flirt",
            CanonicalInterest::Chat => "chat",
            CanonicalInterest::Other => "other",
        }
    }

    pub const fn display_name(&self) -> &'static str {
        match self {
            CanonicalInterest::Flirt => "Флирт",
            CanonicalInterest::Chat => "Общение",
            CanonicalInterest::Other => "Другое",
        }
    }

    /// Canonical tag a stored tag name belongs to after reconciliation.
    pub fn for_tag(name: &str) -> CanonicalInterest {
        if let Ok(canonical) = name.parse() {
            return canonical;
        }
        LEGACY_MAPPINGS
            .iter()
            .find(|(legacy, _)| *legacy == name)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(Self::CATCH_ALL)
    }
}

impl FromStr for CanonicalInterest {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.key() == s)
            .ok_or_else(|| DatabaseError::Validation(format!("unknown interest '{}'", s)))
    }
}

impl fmt::Display for CanonicalInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Legacy tag names with a dedicated canonical target. Name-keyed databases
/// stored the canonical tags under their display names.
pub const LEGACY_MAPPINGS: &[(&str, CanonicalInterest)] = &[
    ("секс", CanonicalInterest::Flirt),
    ("общение", CanonicalInterest::Chat),
    (CanonicalInterest::Flirt.display_name(), CanonicalInterest::Flirt),
    (CanonicalInterest::Chat.display_name(), CanonicalInterest::Chat),
    (CanonicalInterest::Other.display_name(), CanonicalInterest::Other),
];

fn canonical_keys() -> Vec<&'static str> {
    CanonicalInterest::ALL.iter().map(|c| c.key()).collect()
}

fn legacy_names() -> Vec<&'static str> {
    LEGACY_MAPPINGS.iter().map(|(name, _)| *name).collect()
}

/// Rows touched by one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub tags_created: u64,
    pub associations_added: u64,
    pub associations_removed: u64,
    pub tags_removed: u64,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == ReconcileReport::default()
    }
}

/// Inserts the canonical rows (ignoring duplicates) and returns how many were new.
pub(crate) async fn ensure_canonical_interests(conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
    let mut created = 0;
    for canonical in CanonicalInterest::ALL {
        created += sqlx::query("INSERT INTO interests (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(canonical.key())
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(created)
}

/// Maps legacy interest tags onto the canonical taxonomy.
///
/// Must run inside a transaction; callers own commit and rollback.
pub async fn reconcile_interests(conn: &mut PgConnection) -> Result<ReconcileReport, sqlx::Error> {
    let mut report = ReconcileReport {
        tags_created: ensure_canonical_interests(conn).await?,
        ..Default::default()
    };

    let tags: Vec<(i32, String)> = sqlx::query_as("SELECT id, name FROM interests")
        .fetch_all(&mut *conn)
        .await?;

    let canonical_id = |canonical: CanonicalInterest| {
        tags.iter()
            .find(|(_, name)| name == canonical.key())
            .map(|(id, _)| *id)
            .ok_or(sqlx::Error::RowNotFound)
    };
    let legacy_ids: Vec<i32> = tags
        .iter()
        .filter(|(_, name)| name.parse::<CanonicalInterest>().is_err())
        .map(|(id, _)| *id)
        .collect();

    if legacy_ids.is_empty() {
        debug!("No legacy interest tags present");
    }

    for (legacy_name, canonical) in LEGACY_MAPPINGS {
        let Some((legacy_id, _)) = tags.iter().find(|(_, name)| name == legacy_name) else {
            continue;
        };
        let target = canonical_id(*canonical)?;

        let added = sqlx::query(
            r#"
            INSERT INTO user_interests (user_id, interest_id)
            SELECT user_id, $2 FROM user_interests WHERE interest_id = $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(legacy_id)
        .bind(target)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if added > 0 {
            info!(legacy = legacy_name, canonical = %canonical, added, "Moved users to canonical interest");
        }
        report.associations_added += added;
    }

    let catch_all = canonical_id(CanonicalInterest::CATCH_ALL)?;
    let added = sqlx::query(
        r#"
        INSERT INTO user_interests (user_id, interest_id)
        SELECT DISTINCT ui.user_id, $1
        FROM user_interests ui
        JOIN interests i ON i.id = ui.interest_id
        WHERE i.name <> ALL($2) AND i.name <> ALL($3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(catch_all)
    .bind(canonical_keys())
    .bind(legacy_names())
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if added > 0 {
        info!(canonical = %CanonicalInterest::CATCH_ALL, added, "Moved users with unmapped interests to catch-all");
    }
    report.associations_added += added;

    report.associations_removed = sqlx::query(
        r#"
        DELETE FROM user_interests ui
        USING interests i
        WHERE i.id = ui.interest_id AND i.name <> ALL($1)
        "#,
    )
    .bind(canonical_keys())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if !legacy_ids.is_empty() {
        report.tags_removed += sqlx::query(
            r#"
            DELETE FROM interests
            WHERE id = ANY($1)
              AND NOT EXISTS (SELECT 1 FROM user_interests ui WHERE ui.interest_id = interests.id)
            "#,
        )
        .bind(&legacy_ids)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }

    // Catches tags inserted after the id lookup above.
    report.tags_removed += sqlx::query(
        r#"
        DELETE FROM interests
        WHERE name <> ALL($1)
          AND NOT EXISTS (SELECT 1 FROM user_interests ui WHERE ui.interest_id = interests.id)
        "#,
    )
    .bind(canonical_keys())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if report.is_noop() {
        debug!("Interest taxonomy already reconciled");
    } else {
        info!(
            tags_created = report.tags_created,
            associations_added = report.associations_added,
            associations_removed = report.associations_removed,
            tags_removed = report.tags_removed,
            "Interest taxonomy reconciled"
        );
    }

    Ok(report)
}
