// Leaderboard derived from the ledger

use crate::database::DbPool;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::models::{EcoSummary, Standing};

pub struct Leaderboard;

impl Leaderboard {
    /// Standard competition rank among members with ledger entries.
    ///
    /// Ties share a rank and the next group starts at one plus the number of
    /// members ahead of it (100, 100, 50 rank 1, 1, 3). A member without
    /// entries has no row to rank; they are placed last, at the number of
    /// known members but never ahead of anyone who has earned points.
    pub async fn rank_of(pool: &DbPool, member: i64) -> Result<Standing> {
        let ranked: Option<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT ranking, total_users
            FROM (
                SELECT user_id,
                       RANK() OVER (ORDER BY SUM(points) DESC) AS ranking,
                       COUNT(*) OVER () AS total_users
                FROM eco_points
                GROUP BY user_id
            ) rankings
            WHERE user_id = ?
            "#,
        )
        .bind(member)
        .fetch_optional(pool)
        .await?;

        if let Some((ranking, total_users)) = ranked {
            return Ok(Standing { ranking, total_users });
        }

        // the members table is filled by the identity service and may lag
        let last: i64 = sqlx::query_scalar(
            r#"
            SELECT MAX(
                (SELECT COUNT(*) FROM members),
                (SELECT COUNT(DISTINCT user_id) FROM eco_points) + 1
            )
            "#,
        )
        .fetch_one(pool)
        .await?;
        Ok(Standing {
            ranking: last,
            total_users: last,
        })
    }

    pub async fn summary_for(pool: &DbPool, member: i64) -> Result<EcoSummary> {
        let total_points = Ledger::total_for(pool, member).await?;

        let activities_attended: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT activity_id) FROM registrations WHERE user_id = ?")
                .bind(member)
                .fetch_one(pool)
                .await?;

        let challenges_completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM challenge_participants WHERE user_id = ? AND status = 'completed'",
        )
        .bind(member)
        .fetch_one(pool)
        .await?;

        let badges_earned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_badges WHERE user_id = ?")
            .bind(member)
            .fetch_one(pool)
            .await?;

        let standing = Self::rank_of(pool, member).await?;

        Ok(EcoSummary {
            total_points,
            activities_attended,
            challenges_completed,
            badges_earned,
            ranking: standing.ranking,
            total_users: standing.total_users,
        })
    }
}
