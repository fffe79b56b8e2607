// Database models and request/response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EngagementError, Result};

/// Activity with live registration annotations
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Activity {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub image_path: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: String,
    /// 0 means unlimited
    pub max_participants: i64,
    pub eco_points: i64,
    pub current_participants: i64,
    pub user_registered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body for creating or replacing an activity
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityInput {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub image_path: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub max_participants: i64,
    #[serde(default)]
    pub eco_points: i64,
}

impl ActivityInput {
    pub fn validate(&self) -> Result<()> {
        require_text("title", &self.title)?;
        require_text("description", &self.description)?;
        if self.max_participants < 0 {
            return Err(EngagementError::InvalidInput(
                "max_participants must not be negative".to_string(),
            ));
        }
        if self.eco_points < 0 {
            return Err(EngagementError::InvalidInput(
                "eco_points must not be negative".to_string(),
            ));
        }
        if self.end_date < self.start_date {
            return Err(EngagementError::InvalidInput(
                "end_date must not be before start_date".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ledger row resolved with the titles of its origin
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EcoPointEntry {
    pub id: i64,
    pub user_id: i64,
    pub activity_id: Option<i64>,
    pub challenge_id: Option<i64>,
    pub points: i64,
    pub description: String,
    pub date: DateTime<Utc>,
    pub activity_title: Option<String>,
    pub challenge_title: Option<String>,
}

/// A ledger entry about to be appended
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub member: i64,
    pub points: i64,
    pub description: String,
    pub activity_id: Option<i64>,
    pub challenge_id: Option<i64>,
}

impl NewEntry {
    pub fn manual(member: i64, points: i64, description: impl Into<String>) -> Self {
        Self {
            member,
            points,
            description: description.into(),
            activity_id: None,
            challenge_id: None,
        }
    }
}

/// State of a member's participation in a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationStatus {
    InProgress,
    Completed,
    /// Terminal; no operation moves a participation here yet
    Abandoned,
}

impl ParticipationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ParticipationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipationStatus {
    type Err = EngagementError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(EngagementError::InvalidInput(format!(
                "unknown participation status '{}'",
                other
            ))),
        }
    }
}

/// Challenge with the viewer's participation, `not_joined` when absent
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Challenge {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub points: i64,
    pub duration_days: i64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub user_status: String,
    pub joined_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Body for creating or replacing a challenge
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeInput {
    pub title: String,
    pub description: String,
    pub points: i64,
    #[serde(default)]
    pub duration_days: i64,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl ChallengeInput {
    pub fn validate(&self) -> Result<()> {
        require_text("title", &self.title)?;
        require_text("description", &self.description)?;
        if self.points <= 0 {
            return Err(EngagementError::InvalidPoints(self.points));
        }
        if self.duration_days < 0 {
            return Err(EngagementError::InvalidInput(
                "duration_days must not be negative".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(EngagementError::InvalidInput(
                    "end_date must not be before start_date".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Badge {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub image_path: String,
    pub required_points: i64,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EarnedBadge {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub badge: Badge,
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableBadge {
    #[serde(flatten)]
    pub badge: Badge,
    pub points_to_go: i64,
}

/// Earned and not-yet-earned badges of one member
#[derive(Debug, Clone, Serialize)]
pub struct BadgeAwards {
    pub earned_badges: Vec<EarnedBadge>,
    pub available_badges: Vec<AvailableBadge>,
}

/// Leaderboard position of one member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub ranking: i64,
    pub total_users: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EcoSummary {
    pub total_points: i64,
    pub activities_attended: i64,
    pub challenges_completed: i64,
    pub badges_earned: i64,
    pub ranking: i64,
    pub total_users: i64,
}

/// Offset pagination, already clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    /// Clamp raw values: page to at least 1, size to `1..=max_page_size`.
    pub fn clamped(page: i64, page_size: i64, max_page_size: i64) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, max_page_size.max(1)),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

/// Response with one page of items
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// Query parameters for listing activities
#[derive(Debug, Default, Deserialize)]
pub struct ListActivitiesQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
    /// `all=true` includes past activities
    pub all: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegistrationsQuery {
    pub history: Option<String>,
}

/// Manual grant by an administrator
#[derive(Debug, Deserialize)]
pub struct GrantPointsRequest {
    pub points: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EcoPointsResponse {
    pub points: Vec<EcoPointEntry>,
    pub total_points: i64,
}

#[derive(Debug, Serialize)]
pub struct ChallengesResponse {
    pub active_challenges: Vec<Challenge>,
    pub user_challenges: Vec<Challenge>,
    pub completed_challenges: Vec<Challenge>,
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngagementError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}
