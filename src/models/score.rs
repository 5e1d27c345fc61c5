use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const WEIGHT_HOLDINGS: f64 = 0.55;
pub const WEIGHT_IMPACT: f64 = 0.20;
pub const WEIGHT_EVENT_TYPE: f64 = 0.15;
pub const WEIGHT_RECENCY: f64 = 0.10;

/// Per-component contributions behind a total score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub holdings_relevance: f64,
    pub impact_label_score: f64,
    pub event_type_weight: f64,
    pub recency_score: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        WEIGHT_HOLDINGS * self.holdings_relevance
            + WEIGHT_IMPACT * self.impact_label_score
            + WEIGHT_EVENT_TYPE * self.event_type_weight
            + WEIGHT_RECENCY * self.recency_score
    }
}

/// How relevant one cluster is to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEventScore {
    pub cluster_id: Uuid,
    pub user_id: String,
    pub total_score: f64,
    pub breakdown: ScoreBreakdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_is_the_weighted_sum() {
        let b = ScoreBreakdown {
            holdings_relevance: 1.0,
            impact_label_score: 0.5,
            event_type_weight: 0.8,
            recency_score: 0.6,
        };
        let expected = 0.55 * 1.0 + 0.20 * 0.5 + 0.15 * 0.8 + 0.10 * 0.6;
        assert!((b.total() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_total_bounded_by_unit_interval() {
        let zero = ScoreBreakdown {
            holdings_relevance: 0.0,
            impact_label_score: 0.0,
            event_type_weight: 0.0,
            recency_score: 0.0,
        };
        let one = ScoreBreakdown {
            holdings_relevance: 1.0,
            impact_label_score: 1.0,
            event_type_weight: 1.0,
            recency_score: 1.0,
        };
        assert_eq!(zero.total(), 0.0);
        assert!((one.total() - 1.0).abs() < 1e-9);
    }
}
