//! Activity registry: scheduled activities and their rosters.
//!
//! Seats are tracked by `activities.seats_taken`. A registration claims its
//! seat with a conditional increment as the first write of its transaction,
//! so the store's write lock orders racing registrants and the ceiling holds
//! under any interleaving. The registration insert and the seat claim commit
//! or roll back together.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::database::{is_unique_violation, DbPool};
use crate::error::{EngagementError, Result};
use crate::models::{Activity, ActivityInput, PageRequest};

/// Shared projection; binds: viewer
const ACTIVITY_COLUMNS: &str = r#"
    SELECT a.id, a.title, a.description, a.image_path,
           a.start_date, a.end_date, a.location,
           a.max_participants, a.eco_points,
           (SELECT COUNT(*) FROM registrations r WHERE r.activity_id = a.id) AS current_participants,
           EXISTS(SELECT 1 FROM registrations r WHERE r.activity_id = a.id AND r.user_id = ?) AS user_registered,
           a.created_at, a.updated_at
    FROM activities a
"#;

#[derive(Debug, sqlx::FromRow)]
struct SeatState {
    start_date: DateTime<Utc>,
    max_participants: i64,
    seats_taken: i64,
}

impl SeatState {
    fn is_full(&self) -> bool {
        self.max_participants > 0 && self.seats_taken >= self.max_participants
    }
}

pub struct ActivityRegistry;

impl ActivityRegistry {
    pub async fn register(pool: &DbPool, member: i64, activity_id: i64) -> Result<()> {
        if Self::is_registered(pool, member, activity_id).await? {
            return Err(EngagementError::AlreadyRegistered);
        }

        let now = Utc::now();
        let seats = Self::seat_state(pool, activity_id)
            .await?
            .ok_or(EngagementError::NotFound("activity"))?;
        if seats.is_full() || now >= seats.start_date {
            return Err(Self::closed_reason(pool, member, activity_id, now).await?);
        }

        let mut tx = pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE activities SET seats_taken = seats_taken + 1
            WHERE id = ?
              AND start_date > ?
              AND (max_participants = 0 OR seats_taken < max_participants)
            "#,
        )
        .bind(activity_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            // lost a race since the pre-check; report what closed the door
            tx.rollback().await?;
            return Err(Self::closed_reason(pool, member, activity_id, now).await?);
        }

        let inserted = sqlx::query(
            "INSERT INTO registrations (user_id, activity_id, registered_at) VALUES (?, ?, ?)",
        )
        .bind(member)
        .bind(activity_id)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return Err(EngagementError::AlreadyRegistered);
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        info!("Member {} registered for activity {}", member, activity_id);
        Ok(())
    }

    pub async fn unregister(pool: &DbPool, member: i64, activity_id: i64) -> Result<()> {
        if !Self::is_registered(pool, member, activity_id).await? {
            return Err(EngagementError::NotRegistered);
        }

        let now = Utc::now();
        let seats = Self::seat_state(pool, activity_id)
            .await?
            .ok_or(EngagementError::NotFound("activity"))?;
        if now >= seats.start_date {
            return Err(EngagementError::ActivityEnded);
        }

        let mut tx = pool.begin().await?;

        let removed = sqlx::query("DELETE FROM registrations WHERE user_id = ? AND activity_id = ?")
            .bind(member)
            .bind(activity_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            tx.rollback().await?;
            return Err(EngagementError::NotRegistered);
        }

        sqlx::query("UPDATE activities SET seats_taken = seats_taken - 1 WHERE id = ? AND seats_taken > 0")
            .bind(activity_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Member {} unregistered from activity {}", member, activity_id);
        Ok(())
    }

    /// One page of activities by start time, with the total match count.
    pub async fn list(
        pool: &DbPool,
        page: PageRequest,
        upcoming_only: bool,
        viewer: Option<i64>,
    ) -> Result<(Vec<Activity>, i64)> {
        let now = Utc::now();
        let filter = if upcoming_only { "WHERE a.end_date >= ?" } else { "" };

        let sql = format!(
            "{} {} ORDER BY a.start_date ASC, a.id ASC LIMIT ? OFFSET ?",
            ACTIVITY_COLUMNS, filter
        );
        let mut query = sqlx::query_as::<_, Activity>(&sql).bind(viewer);
        if upcoming_only {
            query = query.bind(now);
        }
        let items = query
            .bind(page.page_size)
            .bind(page.offset())
            .fetch_all(pool)
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM activities a {}", filter);
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
        if upcoming_only {
            count = count.bind(now);
        }
        let total = count.fetch_one(pool).await?;

        Ok((items, total))
    }

    pub async fn get(pool: &DbPool, activity_id: i64, viewer: Option<i64>) -> Result<Activity> {
        let sql = format!("{} WHERE a.id = ?", ACTIVITY_COLUMNS);
        sqlx::query_as::<_, Activity>(&sql)
            .bind(viewer)
            .bind(activity_id)
            .fetch_optional(pool)
            .await?
            .ok_or(EngagementError::NotFound("activity"))
    }

    /// Activities the member holds a seat for; past ones only with history.
    pub async fn registrations_of(
        pool: &DbPool,
        member: i64,
        include_history: bool,
    ) -> Result<Vec<Activity>> {
        let history_filter = if include_history { "" } else { "AND a.end_date >= ?" };
        let sql = format!(
            "{} WHERE EXISTS(SELECT 1 FROM registrations mine WHERE mine.activity_id = a.id AND mine.user_id = ?) {} \
             ORDER BY a.start_date ASC, a.id ASC",
            ACTIVITY_COLUMNS, history_filter
        );
        let mut query = sqlx::query_as::<_, Activity>(&sql).bind(member).bind(member);
        if !include_history {
            query = query.bind(Utc::now());
        }
        Ok(query.fetch_all(pool).await?)
    }

    pub async fn create(pool: &DbPool, input: &ActivityInput) -> Result<i64> {
        input.validate()?;
        let now = Utc::now();

        let id = sqlx::query_scalar(
            r#"
            INSERT INTO activities
                (title, description, image_path, start_date, end_date, location,
                 max_participants, eco_points, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.image_path)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(&input.location)
        .bind(input.max_participants)
        .bind(input.eco_points)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;

        info!("Activity {} created: {}", id, input.title);
        Ok(id)
    }

    pub async fn update(pool: &DbPool, activity_id: i64, input: &ActivityInput) -> Result<()> {
        input.validate()?;

        let updated = sqlx::query(
            r#"
            UPDATE activities
            SET title = ?, description = ?, image_path = ?,
                start_date = ?, end_date = ?, location = ?,
                max_participants = ?, eco_points = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.image_path)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(&input.location)
        .bind(input.max_participants)
        .bind(input.eco_points)
        .bind(Utc::now())
        .bind(activity_id)
        .execute(pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(EngagementError::NotFound("activity"));
        }
        info!("Activity {} updated", activity_id);
        Ok(())
    }

    /// Delete an activity with its roster; ledger rows keep their points but
    /// lose the reference. All or nothing.
    pub async fn delete(pool: &DbPool, activity_id: i64) -> Result<()> {
        let mut tx = pool.begin().await?;

        let registrations = sqlx::query("DELETE FROM registrations WHERE activity_id = ?")
            .bind(activity_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("UPDATE eco_points SET activity_id = NULL WHERE activity_id = ?")
            .bind(activity_id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM activities WHERE id = ?")
            .bind(activity_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Err(EngagementError::NotFound("activity"));
        }

        tx.commit().await?;
        info!(
            "Activity {} deleted ({} registrations removed)",
            activity_id, registrations
        );
        Ok(())
    }

    async fn is_registered(pool: &DbPool, member: i64, activity_id: i64) -> Result<bool> {
        let exists = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM registrations WHERE user_id = ? AND activity_id = ?)",
        )
        .bind(member)
        .bind(activity_id)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    async fn seat_state(pool: &DbPool, activity_id: i64) -> Result<Option<SeatState>> {
        let state = sqlx::query_as::<_, SeatState>(
            "SELECT start_date, max_participants, seats_taken FROM activities WHERE id = ?",
        )
        .bind(activity_id)
        .fetch_optional(pool)
        .await?;
        Ok(state)
    }

    /// Why a registration was refused. The member's own seat wins over
    /// capacity, since a concurrent duplicate request may have taken it.
    async fn closed_reason(
        pool: &DbPool,
        member: i64,
        activity_id: i64,
        now: DateTime<Utc>,
    ) -> Result<EngagementError> {
        if Self::is_registered(pool, member, activity_id).await? {
            return Ok(EngagementError::AlreadyRegistered);
        }
        Ok(match Self::seat_state(pool, activity_id).await? {
            None => EngagementError::NotFound("activity"),
            Some(seats) if seats.is_full() => EngagementError::ActivityFull,
            Some(seats) if now >= seats.start_date => EngagementError::ActivityEnded,
            // a seat was released after the claim failed
            Some(_) => EngagementError::ActivityFull,
        })
    }
}
