//! Append-only eco-point ledger.
//!
//! Rows are only ever inserted here. The one later mutation is the nulling
//! of `activity_id` / `challenge_id` when the referenced parent is deleted.

use chrono::Utc;
use sqlx::{Executor, Sqlite};
use tracing::info;

use crate::badges::BadgeQueue;
use crate::database::{is_foreign_key_violation, DbPool};
use crate::error::{EngagementError, Result};
use crate::models::{EcoPointEntry, NewEntry};

pub struct Ledger;

impl Ledger {
    /// Append an entry and schedule badge evaluation for its member.
    pub async fn append(pool: &DbPool, badges: &BadgeQueue, entry: NewEntry) -> Result<i64> {
        if entry.points <= 0 {
            return Err(EngagementError::InvalidPoints(entry.points));
        }
        Self::ensure_origin(pool, &entry).await?;

        let id = Self::insert(pool, &entry).await?;
        info!(
            "Ledger entry {} appended: member={} points={}",
            id, entry.member, entry.points
        );

        badges.schedule(entry.member);
        Ok(id)
    }

    /// Administrator grant with no originating activity or challenge.
    pub async fn grant(
        pool: &DbPool,
        badges: &BadgeQueue,
        member: i64,
        points: i64,
        description: Option<String>,
    ) -> Result<i64> {
        let description = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| "Manual grant".to_string());
        Self::append(pool, badges, NewEntry::manual(member, points, description)).await
    }

    /// Raw insert on any executor, so callers can fold it into their own
    /// transaction. Does not validate and does not schedule badge work.
    pub(crate) async fn insert<'e, E>(executor: E, entry: &NewEntry) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO eco_points (user_id, activity_id, challenge_id, points, description, date)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(entry.member)
        .bind(entry.activity_id)
        .bind(entry.challenge_id)
        .bind(entry.points)
        .bind(&entry.description)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                EngagementError::InvalidInput(
                    "ledger entry references a missing activity or challenge".to_string(),
                )
            } else {
                e.into()
            }
        })?;

        Ok(id)
    }

    /// The referenced activity or challenge must exist.
    async fn ensure_origin(pool: &DbPool, entry: &NewEntry) -> Result<()> {
        if let Some(activity_id) = entry.activity_id {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM activities WHERE id = ?)")
                .bind(activity_id)
                .fetch_one(pool)
                .await?;
            if !exists {
                return Err(EngagementError::NotFound("activity"));
            }
        }
        if let Some(challenge_id) = entry.challenge_id {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM eco_challenges WHERE id = ?)")
                    .bind(challenge_id)
                    .fetch_one(pool)
                    .await?;
            if !exists {
                return Err(EngagementError::NotFound("challenge"));
            }
        }
        Ok(())
    }

    pub async fn total_for(pool: &DbPool, member: i64) -> Result<i64> {
        let total = sqlx::query_scalar("SELECT COALESCE(SUM(points), 0) FROM eco_points WHERE user_id = ?")
            .bind(member)
            .fetch_one(pool)
            .await?;
        Ok(total)
    }

    /// Entries newest first, with activity/challenge titles resolved
    pub async fn history(pool: &DbPool, member: i64) -> Result<Vec<EcoPointEntry>> {
        let entries = sqlx::query_as::<_, EcoPointEntry>(
            r#"
            SELECT ep.id, ep.user_id, ep.activity_id, ep.challenge_id,
                   ep.points, ep.description, ep.date,
                   a.title AS activity_title, c.title AS challenge_title
            FROM eco_points ep
            LEFT JOIN activities a ON ep.activity_id = a.id
            LEFT JOIN eco_challenges c ON ep.challenge_id = c.id
            WHERE ep.user_id = ?
            ORDER BY ep.date DESC, ep.id DESC
            "#,
        )
        .bind(member)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }
}
