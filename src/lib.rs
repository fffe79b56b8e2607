// EcoClub engagement backend
// Activity registration, eco-point ledger, challenges, badges and rankings

pub mod activities;
pub mod api;
pub mod badges;
pub mod caller;
pub mod challenges;
pub mod config;
pub mod database;
pub mod error;
pub mod leaderboard;
pub mod ledger;
pub mod models;

use badges::BadgeQueue;
use config::PageLimits;
use database::DbPool;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub badges: BadgeQueue,
    pub pages: PageLimits,
}
