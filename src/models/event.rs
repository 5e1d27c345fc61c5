use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// Event Types
// ==============================================================================

/// Fixed-vocabulary classification of what kind of market event an article
/// describes. Ordering of the variants reflects rule-fallback priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Earnings,
    Guidance,
    ProductLaunch,
    MergerAcquisition,
    Regulation,
    Litigation,
    AnalystNote,
    Macro,
    SocialSentiment,
    Rumor,
    Fluff,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        EventType::Earnings,
        EventType::Guidance,
        EventType::ProductLaunch,
        EventType::MergerAcquisition,
        EventType::Regulation,
        EventType::Litigation,
        EventType::AnalystNote,
        EventType::Macro,
        EventType::SocialSentiment,
        EventType::Rumor,
        EventType::Fluff,
    ];

    /// Intrinsic importance of this kind of event, independent of any user.
    pub fn base_score(&self) -> f64 {
        match self {
            EventType::Earnings => 1.00,
            EventType::Guidance => 0.95,
            EventType::Regulation => 0.90,
            EventType::MergerAcquisition => 0.85,
            EventType::ProductLaunch => 0.80,
            EventType::Macro => 0.70,
            EventType::Litigation => 0.65,
            EventType::AnalystNote => 0.45,
            EventType::SocialSentiment => 0.35,
            EventType::Rumor => 0.25,
            EventType::Fluff => 0.10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Earnings => "earnings",
            EventType::Guidance => "guidance",
            EventType::ProductLaunch => "productLaunch",
            EventType::MergerAcquisition => "mergerAcquisition",
            EventType::Regulation => "regulation",
            EventType::Litigation => "litigation",
            EventType::AnalystNote => "analystNote",
            EventType::Macro => "macro",
            EventType::SocialSentiment => "socialSentiment",
            EventType::Rumor => "rumor",
            EventType::Fluff => "fluff",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        EventType::ALL
            .iter()
            .copied()
            .find(|e| e.as_str().eq_ignore_ascii_case(trimmed))
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// Impact Labels
// ==============================================================================

/// Orthogonal tag describing the market-impact character of an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ImpactLabel {
    MostImpactful,
    Surprising,
    Drama,
    PriceAffectingAbnormal,
    BigMoves,
    AllTimeHigh,
    AllTimeLow,
    StockPopularity,
}

impl ImpactLabel {
    pub const ALL: [ImpactLabel; 8] = [
        ImpactLabel::MostImpactful,
        ImpactLabel::Surprising,
        ImpactLabel::Drama,
        ImpactLabel::PriceAffectingAbnormal,
        ImpactLabel::BigMoves,
        ImpactLabel::AllTimeHigh,
        ImpactLabel::AllTimeLow,
        ImpactLabel::StockPopularity,
    ];

    /// Weight used when normalizing a cluster's impact-label score.
    pub fn weight(&self) -> f64 {
        match self {
            ImpactLabel::PriceAffectingAbnormal => 0.35,
            ImpactLabel::AllTimeHigh => 0.40,
            ImpactLabel::AllTimeLow => 0.40,
            ImpactLabel::BigMoves => 0.30,
            ImpactLabel::MostImpactful => 0.30,
            ImpactLabel::Surprising => 0.25,
            ImpactLabel::Drama => 0.20,
            ImpactLabel::StockPopularity => 0.15,
        }
    }

    /// Labels strong enough to rescue analyst-note / social-sentiment events
    /// from the beginner/smart pre-filter.
    pub fn is_strong(&self) -> bool {
        matches!(
            self,
            ImpactLabel::MostImpactful
                | ImpactLabel::BigMoves
                | ImpactLabel::AllTimeHigh
                | ImpactLabel::AllTimeLow
                | ImpactLabel::PriceAffectingAbnormal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLabel::MostImpactful => "mostImpactful",
            ImpactLabel::Surprising => "surprising",
            ImpactLabel::Drama => "drama",
            ImpactLabel::PriceAffectingAbnormal => "priceAffectingAbnormal",
            ImpactLabel::BigMoves => "bigMoves",
            ImpactLabel::AllTimeHigh => "allTimeHigh",
            ImpactLabel::AllTimeLow => "allTimeLow",
            ImpactLabel::StockPopularity => "stockPopularity",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        ImpactLabel::ALL
            .iter()
            .copied()
            .find(|l| l.as_str().eq_ignore_ascii_case(trimmed))
    }
}

// ==============================================================================
// Detected Event
// ==============================================================================

/// Classification attached to one cleaned article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedEvent {
    pub id: Uuid,
    pub cleaned_article_id: Uuid,
    pub event_type: EventType,
    pub base_score: f64,
    pub dominant_ticker: Option<String>,
    pub confidence: f64,
    pub impact_labels: Vec<ImpactLabel>,
}

impl DetectedEvent {
    pub fn has_strong_label(&self) -> bool {
        self.impact_labels.iter().any(|l| l.is_strong())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_score_table() {
        assert_eq!(EventType::Earnings.base_score(), 1.00);
        assert_eq!(EventType::Guidance.base_score(), 0.95);
        assert_eq!(EventType::Regulation.base_score(), 0.90);
        assert_eq!(EventType::MergerAcquisition.base_score(), 0.85);
        assert_eq!(EventType::ProductLaunch.base_score(), 0.80);
        assert_eq!(EventType::Macro.base_score(), 0.70);
        assert_eq!(EventType::Litigation.base_score(), 0.65);
        assert_eq!(EventType::AnalystNote.base_score(), 0.45);
        assert_eq!(EventType::SocialSentiment.base_score(), 0.35);
        assert_eq!(EventType::Rumor.base_score(), 0.25);
        assert_eq!(EventType::Fluff.base_score(), 0.10);
    }

    #[test]
    fn test_event_type_round_trip() {
        for e in EventType::ALL {
            assert_eq!(EventType::from_str(e.as_str()), Some(e));
        }
        assert_eq!(EventType::from_str(" EARNINGS "), Some(EventType::Earnings));
        assert_eq!(EventType::from_str("ipo"), None);
    }

    #[test]
    fn test_strong_labels() {
        assert!(ImpactLabel::BigMoves.is_strong());
        assert!(ImpactLabel::AllTimeHigh.is_strong());
        assert!(!ImpactLabel::Drama.is_strong());
        assert!(!ImpactLabel::StockPopularity.is_strong());
    }

    #[test]
    fn test_label_weights_sum() {
        let total: f64 = ImpactLabel::ALL.iter().map(|l| l.weight()).sum();
        assert!((total - 2.35).abs() < 1e-9);
    }
}
