//! Challenge catalog and per-member participation state machine.
//!
//! ```text
//!   (not joined) --join--> in_progress --complete--> completed
//!                              ^
//!   abandoned ------join-------+
//! ```
//!
//! Completion flips the state and appends the reward to the ledger in one
//! transaction. The guarded update (`status = 'in_progress'`) is the first
//! write, so racing completions grant the reward once.

use chrono::Utc;
use tracing::info;

use crate::badges::BadgeQueue;
use crate::database::DbPool;
use crate::error::{EngagementError, Result};
use crate::ledger::Ledger;
use crate::models::{Challenge, ChallengeInput, NewEntry, ParticipationStatus};

const COMPLETION_DESCRIPTION: &str = "Challenge completed";

pub struct ChallengeEngine;

impl ChallengeEngine {
    pub async fn join(pool: &DbPool, member: i64, challenge_id: i64) -> Result<()> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM eco_challenges WHERE id = ?")
                .bind(challenge_id)
                .fetch_optional(pool)
                .await?;
        match active {
            None => return Err(EngagementError::NotFound("challenge")),
            Some(false) => return Err(EngagementError::ChallengeInactive),
            Some(true) => {}
        }

        // fresh row, or re-entry from abandoned; anything else is left alone
        let affected = sqlx::query(
            r#"
            INSERT INTO challenge_participants (user_id, challenge_id, status, joined_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, challenge_id) DO UPDATE
                SET status = excluded.status,
                    joined_at = excluded.joined_at,
                    completed_at = NULL
                WHERE challenge_participants.status = ?
            "#,
        )
        .bind(member)
        .bind(challenge_id)
        .bind(ParticipationStatus::InProgress.as_str())
        .bind(Utc::now())
        .bind(ParticipationStatus::Abandoned.as_str())
        .execute(pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(EngagementError::AlreadyJoined);
        }

        info!("Member {} joined challenge {}", member, challenge_id);
        Ok(())
    }

    /// Complete an in-progress participation and credit the reward.
    /// Returns the id of the ledger entry.
    pub async fn complete(
        pool: &DbPool,
        badges: &BadgeQueue,
        member: i64,
        challenge_id: i64,
    ) -> Result<i64> {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE challenge_participants
            SET status = ?, completed_at = ?
            WHERE user_id = ? AND challenge_id = ? AND status = ?
            "#,
        )
        .bind(ParticipationStatus::Completed.as_str())
        .bind(Utc::now())
        .bind(member)
        .bind(challenge_id)
        .bind(ParticipationStatus::InProgress.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(Self::completion_refusal(pool, member, challenge_id).await?);
        }

        let reward: i64 = sqlx::query_scalar("SELECT points FROM eco_challenges WHERE id = ?")
            .bind(challenge_id)
            .fetch_one(&mut *tx)
            .await?;

        let entry = NewEntry {
            member,
            points: reward,
            description: COMPLETION_DESCRIPTION.to_string(),
            activity_id: None,
            challenge_id: Some(challenge_id),
        };
        let entry_id = Ledger::insert(&mut *tx, &entry).await?;

        tx.commit().await?;
        info!(
            "Member {} completed challenge {} (+{} points)",
            member, challenge_id, reward
        );

        badges.schedule(member);
        Ok(entry_id)
    }

    /// Catalog newest first, annotated with the viewer's status.
    pub async fn list(pool: &DbPool, viewer: Option<i64>, active_only: bool) -> Result<Vec<Challenge>> {
        let filter = if active_only { "WHERE c.is_active = 1" } else { "" };
        let sql = format!(
            r#"
            SELECT c.id, c.title, c.description, c.points, c.duration_days,
                   c.start_date, c.end_date, c.is_active, c.created_at,
                   COALESCE(cp.status, 'not_joined') AS user_status,
                   cp.joined_at, cp.completed_at
            FROM eco_challenges c
            LEFT JOIN challenge_participants cp ON c.id = cp.challenge_id AND cp.user_id = ?
            {}
            ORDER BY c.created_at DESC, c.id DESC
            "#,
            filter
        );

        let challenges = sqlx::query_as::<_, Challenge>(&sql)
            .bind(viewer)
            .fetch_all(pool)
            .await?;
        Ok(challenges)
    }

    /// Challenges the member has joined, most recently joined first
    pub async fn joined_by(pool: &DbPool, member: i64) -> Result<Vec<Challenge>> {
        let challenges = sqlx::query_as::<_, Challenge>(
            r#"
            SELECT c.id, c.title, c.description, c.points, c.duration_days,
                   c.start_date, c.end_date, c.is_active, c.created_at,
                   cp.status AS user_status, cp.joined_at, cp.completed_at
            FROM eco_challenges c
            JOIN challenge_participants cp ON c.id = cp.challenge_id AND cp.user_id = ?
            ORDER BY cp.joined_at DESC, c.id DESC
            "#,
        )
        .bind(member)
        .fetch_all(pool)
        .await?;
        Ok(challenges)
    }

    pub async fn create(pool: &DbPool, input: &ChallengeInput) -> Result<i64> {
        input.validate()?;

        let id = sqlx::query_scalar(
            r#"
            INSERT INTO eco_challenges
                (title, description, points, duration_days, start_date, end_date, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.points)
        .bind(input.duration_days)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.is_active)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        info!("Challenge {} created: {}", id, input.title);
        Ok(id)
    }

    pub async fn update(pool: &DbPool, challenge_id: i64, input: &ChallengeInput) -> Result<()> {
        input.validate()?;

        let updated = sqlx::query(
            r#"
            UPDATE eco_challenges
            SET title = ?, description = ?, points = ?,
                duration_days = ?, start_date = ?, end_date = ?, is_active = ?
            WHERE id = ?
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.points)
        .bind(input.duration_days)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.is_active)
        .bind(challenge_id)
        .execute(pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(EngagementError::NotFound("challenge"));
        }
        info!("Challenge {} updated", challenge_id);
        Ok(())
    }

    /// Delete a challenge with its participations; ledger rows lose the
    /// reference but keep their points. All or nothing.
    pub async fn delete(pool: &DbPool, challenge_id: i64) -> Result<()> {
        let mut tx = pool.begin().await?;

        let participations = sqlx::query("DELETE FROM challenge_participants WHERE challenge_id = ?")
            .bind(challenge_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("UPDATE eco_points SET challenge_id = NULL WHERE challenge_id = ?")
            .bind(challenge_id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM eco_challenges WHERE id = ?")
            .bind(challenge_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Err(EngagementError::NotFound("challenge"));
        }

        tx.commit().await?;
        info!(
            "Challenge {} deleted ({} participations removed)",
            challenge_id, participations
        );
        Ok(())
    }

    async fn completion_refusal(
        pool: &DbPool,
        member: i64,
        challenge_id: i64,
    ) -> Result<EngagementError> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM challenge_participants WHERE user_id = ? AND challenge_id = ?",
        )
        .bind(member)
        .bind(challenge_id)
        .fetch_optional(pool)
        .await?;

        Ok(match status {
            None => EngagementError::NotParticipating,
            Some(raw) => match raw.parse::<ParticipationStatus>()? {
                ParticipationStatus::Completed => EngagementError::AlreadyCompleted,
                other => EngagementError::InvalidState(other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badges::{self, BadgeEngine};
    use crate::config::BadgeWorkerConfig;
    use crate::database::testing::*;

    async fn status_of(pool: &DbPool, member: i64, challenge_id: i64) -> Option<String> {
        sqlx::query_scalar(
            "SELECT status FROM challenge_participants WHERE user_id = ? AND challenge_id = ?",
        )
        .bind(member)
        .bind(challenge_id)
        .fetch_optional(pool)
        .await
        .unwrap()
    }

    async fn abandon(pool: &DbPool, member: i64, challenge_id: i64) {
        sqlx::query(
            "UPDATE challenge_participants SET status = 'abandoned' WHERE user_id = ? AND challenge_id = ?",
        )
        .bind(member)
        .bind(challenge_id)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn join_requires_existing_active_challenge() {
        let (_dir, pool) = scratch_pool().await;
        let inactive = seed_challenge(&pool, 20, false).await;

        let err = ChallengeEngine::join(&pool, 1, 404).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("challenge")));
        let err = ChallengeEngine::join(&pool, 1, inactive).await.unwrap_err();
        assert!(matches!(err, EngagementError::ChallengeInactive));
        assert_eq!(status_of(&pool, 1, inactive).await, None);
    }

    #[tokio::test]
    async fn rejoining_is_refused_unless_abandoned() {
        let (_dir, pool) = scratch_pool().await;
        let queue = badges::spawn_worker(pool.clone(), &BadgeWorkerConfig::default());
        let challenge = seed_challenge(&pool, 20, true).await;

        ChallengeEngine::join(&pool, 1, challenge).await.unwrap();
        let err = ChallengeEngine::join(&pool, 1, challenge).await.unwrap_err();
        assert!(matches!(err, EngagementError::AlreadyJoined));

        ChallengeEngine::complete(&pool, &queue, 1, challenge).await.unwrap();
        let err = ChallengeEngine::join(&pool, 1, challenge).await.unwrap_err();
        assert!(matches!(err, EngagementError::AlreadyJoined));

        abandon(&pool, 1, challenge).await;
        ChallengeEngine::join(&pool, 1, challenge).await.unwrap();
        assert_eq!(status_of(&pool, 1, challenge).await.as_deref(), Some("in_progress"));
        let completed_at: Option<chrono::DateTime<Utc>> = sqlx::query_scalar(
            "SELECT completed_at FROM challenge_participants WHERE user_id = 1 AND challenge_id = ?",
        )
        .bind(challenge)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(completed_at, None);
    }

    #[tokio::test]
    async fn completing_twice_grants_once() {
        let (_dir, pool) = scratch_pool().await;
        let queue = badges::spawn_worker(pool.clone(), &BadgeWorkerConfig::default());
        let challenge = seed_challenge(&pool, 20, true).await;

        ChallengeEngine::join(&pool, 1, challenge).await.unwrap();
        let before = Ledger::total_for(&pool, 1).await.unwrap();
        ChallengeEngine::complete(&pool, &queue, 1, challenge).await.unwrap();
        assert_eq!(Ledger::total_for(&pool, 1).await.unwrap(), before + 20);

        let err = ChallengeEngine::complete(&pool, &queue, 1, challenge).await.unwrap_err();
        assert!(matches!(err, EngagementError::AlreadyCompleted));
        assert_eq!(Ledger::total_for(&pool, 1).await.unwrap(), before + 20);

        let history = Ledger::history(&pool, 1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].challenge_id, Some(challenge));
        assert_eq!(history[0].challenge_title.as_deref(), Some("Bike to work"));
    }

    #[tokio::test]
    async fn complete_requires_participation_in_progress() {
        let (_dir, pool) = scratch_pool().await;
        let queue = badges::spawn_worker(pool.clone(), &BadgeWorkerConfig::default());
        let challenge = seed_challenge(&pool, 20, true).await;

        let err = ChallengeEngine::complete(&pool, &queue, 1, challenge).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotParticipating));

        ChallengeEngine::join(&pool, 1, challenge).await.unwrap();
        abandon(&pool, 1, challenge).await;
        let err = ChallengeEngine::complete(&pool, &queue, 1, challenge).await.unwrap_err();
        assert!(matches!(
            err,
            EngagementError::InvalidState(ParticipationStatus::Abandoned)
        ));
        assert_eq!(Ledger::total_for(&pool, 1).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_completions_grant_once() {
        let (_dir, pool) = scratch_pool().await;
        let queue = badges::spawn_worker(pool.clone(), &BadgeWorkerConfig::default());
        let challenge = seed_challenge(&pool, 20, true).await;
        ChallengeEngine::join(&pool, 1, challenge).await.unwrap();

        let racers: Vec<_> = (0..6)
            .map(|_| {
                let pool = pool.clone();
                let queue = queue.clone();
                tokio::spawn(async move { ChallengeEngine::complete(&pool, &queue, 1, challenge).await })
            })
            .collect();

        let mut successes = 0;
        for racer in racers {
            match racer.await.unwrap() {
                Ok(_) => successes += 1,
                Err(EngagementError::AlreadyCompleted) => {}
                Err(other) => panic!("unexpected failure: {}", other),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(Ledger::total_for(&pool, 1).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn completion_crosses_badge_threshold() {
        let (_dir, pool) = scratch_pool().await;
        let queue = badges::spawn_worker(pool.clone(), &BadgeWorkerConfig::default());
        let badge = seed_badge(&pool, "Half century", 50).await;
        let challenge = seed_challenge(&pool, 20, true).await;
        Ledger::insert(&pool, &NewEntry::manual(1, 40, "earlier work"))
            .await
            .unwrap();

        ChallengeEngine::join(&pool, 1, challenge).await.unwrap();
        ChallengeEngine::complete(&pool, &queue, 1, challenge).await.unwrap();
        // the background pass may or may not have run yet; a direct pass is safe either way
        BadgeEngine::evaluate(&pool, 1).await.unwrap();

        let awards = BadgeEngine::awards(&pool, 1).await.unwrap();
        assert_eq!(awards.earned_badges.len(), 1);
        assert_eq!(awards.earned_badges[0].badge.id, badge);
        assert!(awards.available_badges.iter().all(|b| b.badge.id != badge));

        Ledger::append(&pool, &queue, NewEntry::manual(1, 100, "more work"))
            .await
            .unwrap();
        BadgeEngine::evaluate(&pool, 1).await.unwrap();
        let awards = BadgeEngine::awards(&pool, 1).await.unwrap();
        assert_eq!(
            awards.earned_badges.iter().filter(|b| b.badge.id == badge).count(),
            1
        );
    }

    #[tokio::test]
    async fn listing_annotates_viewer_status() {
        let (_dir, pool) = scratch_pool().await;
        let queue = badges::spawn_worker(pool.clone(), &BadgeWorkerConfig::default());
        let first = seed_challenge(&pool, 10, true).await;
        let second = seed_challenge(&pool, 30, true).await;
        let hidden = seed_challenge(&pool, 5, false).await;

        ChallengeEngine::join(&pool, 1, first).await.unwrap();
        ChallengeEngine::join(&pool, 1, second).await.unwrap();
        ChallengeEngine::complete(&pool, &queue, 1, second).await.unwrap();

        let active = ChallengeEngine::list(&pool, Some(1), true).await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|c| c.id != hidden));
        let status = |id: i64| {
            active
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.user_status.clone())
                .unwrap()
        };
        assert_eq!(status(first), "in_progress");
        assert_eq!(status(second), "completed");

        let anonymous = ChallengeEngine::list(&pool, None, false).await.unwrap();
        assert_eq!(anonymous.len(), 3);
        assert!(anonymous.iter().all(|c| c.user_status == "not_joined"));

        let joined = ChallengeEngine::joined_by(&pool, 1).await.unwrap();
        assert_eq!(joined.len(), 2);
        assert!(joined.iter().any(|c| c.id == second && c.completed_at.is_some()));
    }

    #[tokio::test]
    async fn delete_cascades_and_keeps_points() {
        let (_dir, pool) = scratch_pool().await;
        let queue = badges::spawn_worker(pool.clone(), &BadgeWorkerConfig::default());
        let challenge = seed_challenge(&pool, 20, true).await;
        ChallengeEngine::join(&pool, 1, challenge).await.unwrap();
        ChallengeEngine::complete(&pool, &queue, 1, challenge).await.unwrap();

        ChallengeEngine::delete(&pool, challenge).await.unwrap();

        assert_eq!(status_of(&pool, 1, challenge).await, None);
        let history = Ledger::history(&pool, 1).await.unwrap();
        assert_eq!(history[0].challenge_id, None);
        assert_eq!(Ledger::total_for(&pool, 1).await.unwrap(), 20);

        let err = ChallengeEngine::delete(&pool, challenge).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("challenge")));
    }

    #[tokio::test]
    async fn admin_validation_and_update() {
        let (_dir, pool) = scratch_pool().await;
        let mut input = ChallengeInput {
            title: "Meatless month".to_string(),
            description: "Plant-based meals only".to_string(),
            points: 40,
            duration_days: 30,
            start_date: None,
            end_date: None,
            is_active: true,
        };
        let id = ChallengeEngine::create(&pool, &input).await.unwrap();

        input.is_active = false;
        ChallengeEngine::update(&pool, id, &input).await.unwrap();
        let err = ChallengeEngine::join(&pool, 1, id).await.unwrap_err();
        assert!(matches!(err, EngagementError::ChallengeInactive));

        input.points = -1;
        let err = ChallengeEngine::update(&pool, id, &input).await.unwrap_err();
        assert!(matches!(err, EngagementError::InvalidPoints(-1)));

        input.points = 10;
        let err = ChallengeEngine::update(&pool, id + 100, &input).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("challenge")));
    }
}
