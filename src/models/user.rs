use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ==============================================================================
// User Preference Enums
// ==============================================================================

/// How often the user wants to hear from us, bounded by the daily push cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Quiet,
    Balanced,
    Active,
}

impl Frequency {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "quiet" => Some(Frequency::Quiet),
            "balanced" => Some(Frequency::Balanced),
            "active" => Some(Frequency::Active),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Quiet => "quiet",
            Frequency::Balanced => "balanced",
            Frequency::Active => "active",
        }
    }
}

/// Alert strictness. Governs price, news-tier, and social-spike thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Calm,
    Curious,
    Alert,
}

impl Sensitivity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "calm" => Some(Sensitivity::Calm),
            "curious" => Some(Sensitivity::Curious),
            "alert" => Some(Sensitivity::Alert),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Calm => "calm",
            Sensitivity::Curious => "curious",
            Sensitivity::Alert => "alert",
        }
    }

    /// Minimum absolute 15-minute price move (percent) that fires an alert.
    pub fn price_threshold_pct(&self) -> f64 {
        match self {
            Sensitivity::Calm => 3.0,
            Sensitivity::Curious => 2.0,
            Sensitivity::Alert => 1.0,
        }
    }

    /// Source tiers this sensitivity accepts for news alerts.
    pub fn accepted_news_tiers(&self) -> &'static [i32] {
        match self {
            Sensitivity::Calm => &[1],
            Sensitivity::Curious => &[1, 2],
            Sensitivity::Alert => &[1, 2, 3],
        }
    }

    /// Minimum social-mention spike multiple that fires an alert.
    pub fn social_spike_threshold(&self) -> f64 {
        match self {
            Sensitivity::Calm => 3.0,
            Sensitivity::Curious => 2.0,
            Sensitivity::Alert => 1.5,
        }
    }
}

/// Experience dial: governs hard feed filters and the feed cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Beginner,
    Smart,
    Focus,
}

impl Mode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "beginner" => Some(Mode::Beginner),
            "smart" => Some(Mode::Smart),
            "focus" => Some(Mode::Focus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Beginner => "beginner",
            Mode::Smart => "smart",
            Mode::Focus => "focus",
        }
    }

    /// Maximum number of clusters that survive into the feed.
    pub fn feed_cap(&self) -> usize {
        match self {
            Mode::Beginner => 6,
            Mode::Smart => 5,
            Mode::Focus => 4,
        }
    }
}

// ==============================================================================
// Persisted rows
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AppUser {
    pub user_id: String,
    pub name: Option<String>,
    pub push_token: Option<String>,
    pub notification_frequency: String,
    pub notification_sensitivity: String,
    pub weekly_summary: bool,
    pub mode: String,
    pub max_daily_pushes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppUser {
    pub fn sensitivity(&self) -> Sensitivity {
        Sensitivity::from_str(&self.notification_sensitivity).unwrap_or(Sensitivity::Curious)
    }

    pub fn frequency(&self) -> Frequency {
        Frequency::from_str(&self.notification_frequency).unwrap_or(Frequency::Balanced)
    }

    pub fn mode(&self) -> Mode {
        Mode::from_str(&self.mode).unwrap_or(Mode::Smart)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Holding {
    pub id: uuid::Uuid,
    pub user_id: String,
    pub symbol: String,
    pub name: Option<String>,
    pub allocation: Option<f64>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// Pipeline-side view of a user
// ==============================================================================

/// Everything the personalization pipeline needs to know about a user.
/// Assembled from `app_user` + `holding` rows; the pipeline itself never
/// touches the database.
#[derive(Debug, Clone)]
pub struct UserSettings {
    pub user_id: String,
    pub user_name: Option<String>,
    pub holdings: Vec<HoldingRef>,
    pub frequency: Frequency,
    pub sensitivity: Sensitivity,
    pub weekly_summary: bool,
    pub mode: Mode,
}

#[derive(Debug, Clone)]
pub struct HoldingRef {
    pub symbol: String,
    pub name: Option<String>,
}

impl UserSettings {
    pub fn owns(&self, symbol: &str) -> bool {
        self.holdings.iter().any(|h| h.symbol == symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.holdings.iter().map(|h| h.symbol.clone()).collect()
    }
}
