use std::ops::RangeInclusive;
use tracing::{debug, info, instrument};

use crate::db::models::{
    ChatId, ProfileSetupState, ProfileUpdate, RatingKind, RatingSummary, SetupProgress, UserId,
    UserProfile,
};
use crate::db::operations::DbOperations;
use crate::db::taxonomy::CanonicalInterest;
use crate::error::DatabaseError;

pub const AGE_RANGE: RangeInclusive<i32> = 10..=100;

fn validate(update: &ProfileUpdate) -> Result<(), DatabaseError> {
    match update.age {
        Some(age) if !AGE_RANGE.contains(&age) => Err(DatabaseError::Validation(format!(
            "age {} outside {}..={}",
            age,
            AGE_RANGE.start(),
            AGE_RANGE.end()
        ))),
        _ => Ok(()),
    }
}

impl DbOperations {
    // Profile setup dialog

    #[instrument(skip(self), err)]
    pub async fn update_profile_setup_state(
        &self,
        user_id: UserId,
        state: ProfileSetupState,
        step: i32,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO user_state (user_id, profile_setup_state, profile_setup_step)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET
                profile_setup_state = EXCLUDED.profile_setup_state,
                profile_setup_step = EXCLUDED.profile_setup_step
            "#,
        )
        .bind(user_id)
        .bind(state.as_str())
        .bind(step)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    /// Defaults to `none` / step 0 for users without a state row.
    #[instrument(skip(self), err)]
    pub async fn get_profile_setup_state(&self, user_id: UserId) -> Result<SetupProgress, DatabaseError> {
        let row: Option<(Option<String>, Option<i32>)> = sqlx::query_as(
            "SELECT profile_setup_state, profile_setup_step FROM user_state WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        let Some((state, step)) = row else {
            return Ok(SetupProgress::default());
        };
        let state = match state {
            Some(state) => ProfileSetupState::decode(&state)?,
            None => ProfileSetupState::None,
        };

        Ok(SetupProgress {
            state,
            step: step.unwrap_or(0),
        })
    }

    // Profile

    /// Creates or partially updates a profile. Fields left `None` keep their
    /// stored value; an empty update writes nothing.
    #[instrument(skip(self), err)]
    pub async fn save_user_profile(&self, user_id: UserId, update: ProfileUpdate) -> Result<(), DatabaseError> {
        validate(&update)?;
        if update.is_empty() {
            debug!(user_id, "Empty profile update, nothing to save");
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, gender, looking_for, age)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id)
            DO UPDATE SET
                gender = COALESCE(EXCLUDED.gender, user_profiles.gender),
                looking_for = COALESCE(EXCLUDED.looking_for, user_profiles.looking_for),
                age = COALESCE(EXCLUDED.age, user_profiles.age),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(user_id)
        .bind(update.gender.map(|g| g.as_str()))
        .bind(update.looking_for.map(|l| l.as_str()))
        .bind(update.age)
        .execute(self.pool.as_ref())
        .await?;

        info!(user_id, "Profile saved");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_user_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, DatabaseError> {
        let profile = sqlx::query_as::<_, UserProfile>(
            "SELECT user_id, gender, looking_for, age FROM user_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(profile)
    }

    /// Complete means a gender is set and at least one interest is chosen.
    #[instrument(skip(self), err)]
    pub async fn has_completed_profile(&self, user_id: UserId) -> Result<bool, DatabaseError> {
        let complete: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_profiles p
                WHERE p.user_id = $1
                  AND p.gender IS NOT NULL
                  AND EXISTS (SELECT 1 FROM user_interests ui WHERE ui.user_id = p.user_id)
            )
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(complete)
    }

    // Interests

    /// Adds an interest; adding one the user already has is a no-op.
    /// Returns whether a new association was created.
    #[instrument(skip(self), err)]
    pub async fn save_user_interest(
        &self,
        user_id: UserId,
        interest: CanonicalInterest,
    ) -> Result<bool, DatabaseError> {
        let mut transaction = self.begin_transaction().await?;

        let result = async {
            let interest_id: i32 = sqlx::query_scalar(
                r#"
                INSERT INTO interests (name) VALUES ($1)
                ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                RETURNING id
                "#,
            )
            .bind(interest.key())
            .fetch_one(&mut *transaction)
            .await?;

            let added = sqlx::query(
                "INSERT INTO user_interests (user_id, interest_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(interest_id)
            .execute(&mut *transaction)
            .await?
            .rows_affected();
            Ok::<_, sqlx::Error>(added > 0)
        }
        .await;

        match result {
            Ok(added) => {
                transaction.commit().await?;
                Ok(added)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e.into())
            }
        }
    }

    /// Returns whether the user had the interest.
    #[instrument(skip(self), err)]
    pub async fn remove_user_interest(
        &self,
        user_id: UserId,
        interest: CanonicalInterest,
    ) -> Result<bool, DatabaseError> {
        let removed = sqlx::query(
            r#"
            DELETE FROM user_interests ui
            USING interests i
            WHERE i.id = ui.interest_id AND ui.user_id = $1 AND i.name = $2
            "#,
        )
        .bind(user_id)
        .bind(interest.key())
        .execute(self.pool.as_ref())
        .await?
        .rows_affected();

        Ok(removed > 0)
    }

    /// Replaces the user's whole interest set in one transaction.
    #[instrument(skip(self), err)]
    pub async fn save_user_interests(
        &self,
        user_id: UserId,
        interests: &[CanonicalInterest],
    ) -> Result<(), DatabaseError> {
        let keys: Vec<&str> = interests.iter().map(|i| i.key()).collect();
        let mut transaction = self.begin_transaction().await?;

        let result = async {
            sqlx::query("DELETE FROM user_interests WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *transaction)
                .await?;

            sqlx::query(
                "INSERT INTO interests (name) SELECT UNNEST($1::VARCHAR[]) ON CONFLICT (name) DO NOTHING",
            )
            .bind(&keys)
            .execute(&mut *transaction)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO user_interests (user_id, interest_id)
                SELECT $1, id FROM interests WHERE name = ANY($2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(&keys)
            .execute(&mut *transaction)
            .await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                transaction.commit().await?;
                Ok(())
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e.into())
            }
        }
    }

    /// The user's canonical interests, in taxonomy order.
    #[instrument(skip(self), err)]
    pub async fn get_user_interests(&self, user_id: UserId) -> Result<Vec<CanonicalInterest>, DatabaseError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT i.name
            FROM user_interests ui
            JOIN interests i ON i.id = ui.interest_id
            WHERE ui.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        // Legacy rows only exist until the next reconciliation; skip them.
        let mut interests: Vec<CanonicalInterest> =
            names.iter().filter_map(|name| name.parse().ok()).collect();
        interests.sort();
        Ok(interests)
    }

    // Ratings

    #[instrument(skip(self), err)]
    pub async fn save_user_rating(
        &self,
        chat_id: ChatId,
        rater_id: UserId,
        rated_user_id: UserId,
        kind: RatingKind,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO user_ratings (chat_id, rater_id, rated_user_id, rating_type)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(chat_id)
        .bind(rater_id)
        .bind(rated_user_id)
        .bind(kind.as_str())
        .execute(self.pool.as_ref())
        .await?;

        info!(chat_id, rater_id, rated_user_id, "Rating saved");
        Ok(())
    }

    /// Counts of each rating kind received by the user.
    #[instrument(skip(self), err)]
    pub async fn get_user_ratings(&self, user_id: UserId) -> Result<RatingSummary, DatabaseError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT rating_type, COUNT(*)
            FROM user_ratings
            WHERE rated_user_id = $1
            GROUP BY rating_type
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(RatingSummary::from_counts(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_validation() {
        assert!(validate(&ProfileUpdate::age(18)).is_ok());
        assert!(validate(&ProfileUpdate::age(10)).is_ok());
        assert!(validate(&ProfileUpdate::age(100)).is_ok());
        assert!(matches!(
            validate(&ProfileUpdate::age(9)),
            Err(DatabaseError::Validation(_))
        ));
        assert!(validate(&ProfileUpdate::age(101)).is_err());
        assert!(validate(&ProfileUpdate::default()).is_ok());
    }
}
