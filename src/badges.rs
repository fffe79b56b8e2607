//! Badge engine and its background evaluation worker.
//!
//! Point-earning writes never wait for badges. They drop the member id on a
//! bounded queue; the worker drains it and runs [`BadgeEngine::evaluate`]
//! under a concurrency limit, retrying with backoff and logging anything
//! that still fails. Awards are insert-or-ignore on `(user_id, badge_id)`,
//! so overlapping or repeated evaluations are harmless.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::BadgeWorkerConfig;
use crate::database::DbPool;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::models::{AvailableBadge, Badge, BadgeAwards, EarnedBadge};

pub struct BadgeEngine;

impl BadgeEngine {
    /// Award every badge whose threshold the member's total has reached and
    /// that the member does not hold yet. Returns how many were newly awarded.
    pub async fn evaluate(pool: &DbPool, member: i64) -> Result<usize> {
        let total = Ledger::total_for(pool, member).await?;

        let held: HashSet<i64> =
            sqlx::query_scalar::<_, i64>("SELECT badge_id FROM user_badges WHERE user_id = ?")
                .bind(member)
                .fetch_all(pool)
                .await?
                .into_iter()
                .collect();

        let eligible: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM badges WHERE required_points <= ? ORDER BY required_points ASC",
        )
        .bind(total)
        .fetch_all(pool)
        .await?;

        let mut awarded = 0;
        for badge_id in eligible.into_iter().filter(|id| !held.contains(id)) {
            // a concurrent evaluation may have won; that is still success
            let inserted = sqlx::query(
                "INSERT INTO user_badges (user_id, badge_id, earned_at) VALUES (?, ?, ?)
                 ON CONFLICT (user_id, badge_id) DO NOTHING",
            )
            .bind(member)
            .bind(badge_id)
            .bind(Utc::now())
            .execute(pool)
            .await?
            .rows_affected();

            if inserted == 1 {
                info!("Badge {} awarded to member {} (total={})", badge_id, member, total);
                awarded += 1;
            }
        }

        Ok(awarded)
    }

    /// Earned badges (newest first) and the rest with the remaining gap.
    pub async fn awards(pool: &DbPool, member: i64) -> Result<BadgeAwards> {
        let total = Ledger::total_for(pool, member).await?;

        let earned_badges = sqlx::query_as::<_, EarnedBadge>(
            r#"
            SELECT b.id, b.name, b.description, b.image_path, b.required_points, b.category,
                   ub.earned_at
            FROM badges b
            JOIN user_badges ub ON b.id = ub.badge_id
            WHERE ub.user_id = ?
            ORDER BY ub.earned_at DESC, b.id DESC
            "#,
        )
        .bind(member)
        .fetch_all(pool)
        .await?;

        let available_badges = sqlx::query_as::<_, Badge>(
            r#"
            SELECT b.id, b.name, b.description, b.image_path, b.required_points, b.category
            FROM badges b
            WHERE b.id NOT IN (SELECT badge_id FROM user_badges WHERE user_id = ?)
            ORDER BY b.required_points ASC, b.id ASC
            "#,
        )
        .bind(member)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|badge| AvailableBadge {
            points_to_go: points_to_go(badge.required_points, total),
            badge,
        })
        .collect();

        Ok(BadgeAwards {
            earned_badges,
            available_badges,
        })
    }

    pub async fn catalog(pool: &DbPool) -> Result<Vec<Badge>> {
        let badges = sqlx::query_as::<_, Badge>(
            "SELECT id, name, description, image_path, required_points, category
             FROM badges ORDER BY required_points ASC, id ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(badges)
    }
}

fn points_to_go(required: i64, total: i64) -> i64 {
    (required - total).max(0)
}

/// Handle for scheduling badge evaluations. Cloning is cheap.
#[derive(Clone)]
pub struct BadgeQueue {
    tx: mpsc::Sender<i64>,
}

impl BadgeQueue {
    /// Fire-and-forget: never blocks and never reports failure. When the
    /// queue is full the request is dropped; the member's next point
    /// entry schedules a fresh evaluation that catches up on every threshold.
    pub fn schedule(&self, member: i64) {
        match self.tx.try_send(member) {
            Ok(()) => debug!("Badge evaluation queued for member {}", member),
            Err(TrySendError::Full(member)) => {
                warn!("Badge queue full; evaluation for member {} dropped", member);
            }
            Err(TrySendError::Closed(member)) => {
                warn!("Badge worker stopped; evaluation for member {} dropped", member);
            }
        }
    }
}

pub struct BadgeWorker {
    pool: DbPool,
    rx: mpsc::Receiver<i64>,
    limit: Arc<Semaphore>,
    config: BadgeWorkerConfig,
}

impl BadgeWorker {
    pub fn new(pool: DbPool, config: &BadgeWorkerConfig) -> (BadgeQueue, Self) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let worker = Self {
            pool,
            rx,
            limit: Arc::new(Semaphore::new(config.workers.max(1))),
            config: config.clone(),
        };
        (BadgeQueue { tx }, worker)
    }

    /// Drain the queue until every [`BadgeQueue`] handle is dropped.
    pub async fn run(mut self) {
        info!(
            "Badge worker started (workers={}, attempts={})",
            self.config.workers, self.config.max_attempts
        );

        while let Some(member) = self.rx.recv().await {
            let permit = match self.limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let pool = self.pool.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                evaluate_with_retry(&pool, member, &config).await;
                drop(permit);
            });
        }

        info!("Badge worker stopped");
    }
}

/// Build a queue and run its worker on the current runtime.
pub fn spawn_worker(pool: DbPool, config: &BadgeWorkerConfig) -> BadgeQueue {
    let (queue, worker) = BadgeWorker::new(pool, config);
    tokio::spawn(worker.run());
    queue
}

async fn evaluate_with_retry(pool: &DbPool, member: i64, config: &BadgeWorkerConfig) {
    let attempts = config.max_attempts.max(1);
    for attempt in 1..=attempts {
        match BadgeEngine::evaluate(pool, member).await {
            Ok(awarded) => {
                debug!("Badge evaluation for member {} awarded {}", member, awarded);
                return;
            }
            Err(e) if attempt < attempts => {
                let delay = config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "Badge evaluation for member {} failed (attempt {}/{}): {}; retrying in {:?}",
                    member, attempt, attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    "Badge evaluation for member {} abandoned after {} attempts: {}",
                    member, attempts, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::*;
    use crate::models::NewEntry;
    use std::time::Duration;

    async fn held_badges(pool: &DbPool, member: i64) -> Vec<i64> {
        sqlx::query_scalar("SELECT badge_id FROM user_badges WHERE user_id = ? ORDER BY badge_id")
            .bind(member)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    async fn add_points(pool: &DbPool, member: i64, points: i64) {
        Ledger::insert(pool, &NewEntry::manual(member, points, "test"))
            .await
            .unwrap();
    }

    #[test]
    fn gap_is_floored_at_zero() {
        assert_eq!(points_to_go(50, 40), 10);
        assert_eq!(points_to_go(50, 50), 0);
        assert_eq!(points_to_go(50, 90), 0);
    }

    #[tokio::test]
    async fn awards_only_reached_thresholds() {
        let (_dir, pool) = scratch_pool().await;
        let low = seed_badge(&pool, "Low", 10).await;
        let mid = seed_badge(&pool, "Mid", 50).await;
        seed_badge(&pool, "High", 100).await;

        add_points(&pool, 1, 60).await;
        assert_eq!(BadgeEngine::evaluate(&pool, 1).await.unwrap(), 2);
        assert_eq!(held_badges(&pool, 1).await, vec![low, mid]);
    }

    #[tokio::test]
    async fn evaluation_is_idempotent() {
        let (_dir, pool) = scratch_pool().await;
        let badge = seed_badge(&pool, "Low", 10).await;
        add_points(&pool, 1, 10).await;

        assert_eq!(BadgeEngine::evaluate(&pool, 1).await.unwrap(), 1);
        assert_eq!(BadgeEngine::evaluate(&pool, 1).await.unwrap(), 0);
        assert_eq!(held_badges(&pool, 1).await, vec![badge]);
    }

    #[tokio::test]
    async fn overlapping_evaluations_award_once() {
        let (_dir, pool) = scratch_pool().await;
        let badge = seed_badge(&pool, "Low", 10).await;
        add_points(&pool, 1, 25).await;

        let runs: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { BadgeEngine::evaluate(&pool, 1).await })
            })
            .collect();
        let mut total_awarded = 0;
        for run in runs {
            total_awarded += run.await.unwrap().unwrap();
        }

        assert_eq!(total_awarded, 1);
        assert_eq!(held_badges(&pool, 1).await, vec![badge]);
    }

    #[tokio::test]
    async fn awards_splits_earned_and_available() {
        let (_dir, pool) = scratch_pool().await;
        let low = seed_badge(&pool, "Low", 10).await;
        let high = seed_badge(&pool, "High", 100).await;
        add_points(&pool, 1, 30).await;
        BadgeEngine::evaluate(&pool, 1).await.unwrap();

        let awards = BadgeEngine::awards(&pool, 1).await.unwrap();
        assert_eq!(awards.earned_badges.len(), 1);
        assert_eq!(awards.earned_badges[0].badge.id, low);
        assert_eq!(awards.available_badges.len(), 1);
        assert_eq!(awards.available_badges[0].badge.id, high);
        assert_eq!(awards.available_badges[0].points_to_go, 70);
    }

    #[tokio::test]
    async fn unevaluated_reached_badges_show_zero_gap() {
        let (_dir, pool) = scratch_pool().await;
        seed_badge(&pool, "Low", 10).await;
        add_points(&pool, 1, 30).await;

        let awards = BadgeEngine::awards(&pool, 1).await.unwrap();
        assert!(awards.earned_badges.is_empty());
        assert_eq!(awards.available_badges[0].points_to_go, 0);
    }

    #[tokio::test]
    async fn worker_eventually_awards() {
        let (_dir, pool) = scratch_pool().await;
        let badge = seed_badge(&pool, "Low", 10).await;
        let queue = spawn_worker(pool.clone(), &BadgeWorkerConfig::default());

        Ledger::append(&pool, &queue, NewEntry::manual(5, 12, "cleanup"))
            .await
            .unwrap();

        let mut held = Vec::new();
        for _ in 0..100 {
            held = held_badges(&pool, 5).await;
            if !held.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(held, vec![badge]);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_growing() {
        let (_dir, pool) = scratch_pool().await;
        let config = BadgeWorkerConfig {
            queue_capacity: 2,
            ..BadgeWorkerConfig::default()
        };
        let (queue, mut worker) = BadgeWorker::new(pool, &config);

        for member in 1..=10 {
            queue.schedule(member);
        }

        let mut queued = Vec::new();
        while let Ok(member) = worker.rx.try_recv() {
            queued.push(member);
        }
        assert_eq!(queued, vec![1, 2]);
    }

    #[tokio::test]
    async fn scheduling_after_worker_stops_is_silent() {
        let (_dir, pool) = scratch_pool().await;
        let (queue, worker) = BadgeWorker::new(pool, &BadgeWorkerConfig::default());
        drop(worker);
        queue.schedule(1);
    }
}
