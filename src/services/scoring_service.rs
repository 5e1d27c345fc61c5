use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::score::{
    WEIGHT_EVENT_TYPE, WEIGHT_HOLDINGS, WEIGHT_IMPACT, WEIGHT_RECENCY,
};
use crate::models::{
    DetectedEvent, EventCluster, EventType, ImpactLabel, Mode, ScoreBreakdown, UserEventScore,
    UserSettings,
};

/// Focus mode drops anything below this after scoring.
const FOCUS_MIN_SCORE: f64 = 0.5;

/// Small sector map used for the 0.3 sector-affinity tier of holdings
/// relevance. Symbols and keywords, per sector.
const SECTOR_MAP: &[(&str, &[&str], &[&str])] = &[
    (
        "technology",
        &[
            "AAPL", "MSFT", "GOOGL", "GOOG", "META", "NVDA", "AMD", "INTC", "CRM", "ORCL", "ADBE",
            "CSCO", "QCOM", "TXN", "IBM", "ARM", "SMCI", "MU", "PANW", "SNOW", "NET", "SHOP",
            "PYPL", "SQ", "UBER", "SNAP", "PLTR", "COIN", "NFLX", "AMZN",
        ],
        &["chip", "semiconductor", "software", "cloud", "artificial intelligence", "tech"],
    ),
    (
        "financials",
        &["JPM", "BAC", "WFC", "GS", "MS", "V", "MA"],
        &["bank", "lending", "credit", "brokerage"],
    ),
    (
        "energy",
        &["XOM", "CVX"],
        &["oil", "crude", "natural gas", "energy"],
    ),
    (
        "healthcare",
        &["UNH", "JNJ", "PFE", "MRK", "ABBV", "LLY", "TMO", "ABT", "DHR", "MRNA", "BNTX"],
        &["drug", "pharma", "vaccine", "fda", "health insurer"],
    ),
    (
        "consumer",
        &["WMT", "COST", "PG", "KO", "PEP", "MCD", "NKE", "SBUX", "HD", "DIS"],
        &["retail", "consumer", "restaurant", "shopper"],
    ),
    (
        "autos",
        &["TSLA", "F", "GM", "RIVN", "LCID"],
        &["automaker", "vehicle", "electric vehicle", "ev "],
    ),
    (
        "airlines",
        &["DAL", "UAL", "AAL"],
        &["airline", "carrier", "flight"],
    ),
];

/// Score one cluster for one user. Returns None when a hard pre- or
/// post-filter removes the cluster from this user's feed.
pub fn score(
    cluster: &EventCluster,
    settings: &UserSettings,
    events: &HashMap<Uuid, DetectedEvent>,
) -> Option<UserEventScore> {
    let holdings = settings.symbols();
    let is_holdings_cluster = cluster
        .dominant_ticker
        .as_ref()
        .map(|t| holdings.contains(t))
        .unwrap_or(false)
        || cluster.is_holdings_related();

    // --- hard pre-filters ------------------------------------------------------

    if settings.mode == Mode::Focus {
        match &cluster.dominant_ticker {
            Some(ticker) if holdings.contains(ticker) => {}
            _ => return None,
        }
    }

    let focus_holdings_exempt = settings.mode == Mode::Focus && is_holdings_cluster;

    if cluster.event_type == EventType::Fluff && !focus_holdings_exempt {
        return None;
    }

    if cluster.articles.iter().any(|a| a.is_low_information) && !focus_holdings_exempt {
        return None;
    }

    if matches!(settings.mode, Mode::Beginner | Mode::Smart) && !is_holdings_cluster {
        let cluster_events: Vec<&DetectedEvent> = cluster
            .articles
            .iter()
            .filter_map(|a| events.get(&a.id))
            .collect();
        let has_strong_label = cluster_events.iter().any(|e| e.has_strong_label());

        match cluster.event_type {
            EventType::Fluff | EventType::Rumor => return None,
            EventType::AnalystNote | EventType::SocialSentiment if !has_strong_label => {
                return None
            }
            _ => {}
        }
    }

    // --- components ------------------------------------------------------------

    let breakdown = ScoreBreakdown {
        holdings_relevance: holdings_relevance(cluster, settings),
        impact_label_score: impact_label_score(cluster, events),
        event_type_weight: cluster.event_type.base_score(),
        recency_score: recency_score_hours(
            (Utc::now() - cluster.created_at).num_seconds() as f64 / 3600.0,
        ),
    };
    let total_score = breakdown.total();

    // --- post-filter -----------------------------------------------------------

    if settings.mode == Mode::Focus && total_score < FOCUS_MIN_SCORE {
        return None;
    }

    Some(UserEventScore {
        cluster_id: cluster.id,
        user_id: settings.user_id.clone(),
        total_score,
        breakdown,
    })
}

// ==============================================================================
// Components
// ==============================================================================

pub fn holdings_relevance(cluster: &EventCluster, settings: &UserSettings) -> f64 {
    let canonical = cluster.canonical();

    if let Some(ticker) = &cluster.dominant_ticker {
        if settings.owns(ticker) {
            if text_has_token(&canonical.clean_title, ticker) {
                return 1.0;
            }
            // Owned but only in body or a sibling article.
            return 0.6;
        }
        // Known ticker the user does not hold.
        return if owns_sector_of(settings, ticker) { 0.3 } else { 0.0 };
    }

    // No dominant ticker: sector keywords against everything the user holds.
    let text = format!("{} {}", canonical.clean_title, canonical.clean_body).to_lowercase();
    for (_, symbols, keywords) in SECTOR_MAP {
        let user_in_sector = settings
            .holdings
            .iter()
            .any(|h| symbols.contains(&h.symbol.as_str()));
        if user_in_sector && keywords.iter().any(|k| text.contains(k)) {
            return 0.3;
        }
    }

    0.15
}

fn owns_sector_of(settings: &UserSettings, ticker: &str) -> bool {
    SECTOR_MAP
        .iter()
        .find(|(_, symbols, _)| symbols.contains(&ticker))
        .map(|(_, symbols, _)| {
            settings
                .holdings
                .iter()
                .any(|h| symbols.contains(&h.symbol.as_str()))
        })
        .unwrap_or(false)
}

/// Weighted label mass over the cluster's events, normalized by the full
/// label weight budget and clamped to the unit interval.
pub fn impact_label_score(
    cluster: &EventCluster,
    events: &HashMap<Uuid, DetectedEvent>,
) -> f64 {
    let total_weight: f64 = ImpactLabel::ALL.iter().map(|l| l.weight()).sum();

    let label_mass: f64 = cluster
        .articles
        .iter()
        .filter_map(|a| events.get(&a.id))
        .flat_map(|e| e.impact_labels.iter())
        .map(|l| l.weight())
        .sum();

    (label_mass / total_weight).clamp(0.0, 1.0)
}

pub fn recency_score_hours(hours: f64) -> f64 {
    if hours < 1.0 {
        1.0
    } else if hours < 3.0 {
        0.9
    } else if hours < 12.0 {
        0.75
    } else if hours < 24.0 {
        0.6
    } else if hours < 72.0 {
        0.4
    } else if hours < 168.0 {
        0.2
    } else {
        0.1
    }
}

fn text_has_token(text: &str, token: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| word.eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CleanedArticle, HoldingRef};
    use chrono::Duration;

    fn article(title: &str, body: &str, tickers: &[&str], low_info: bool) -> CleanedArticle {
        CleanedArticle {
            id: Uuid::new_v4(),
            raw_article_id: Uuid::new_v4(),
            url: format!("https://example.com/{}", Uuid::new_v4()),
            clean_title: title.to_string(),
            clean_description: String::new(),
            clean_body: body.to_string(),
            clean_tickers: tickers.iter().map(|s| s.to_string()).collect(),
            language: "en".to_string(),
            source: "Reuters".to_string(),
            source_quality_score: 1.0,
            published_at: Utc::now(),
            author: None,
            source_category: None,
            is_holdings_news: false,
            is_low_information: low_info,
        }
    }

    fn cluster_of(
        articles: Vec<CleanedArticle>,
        event_type: EventType,
        dominant: Option<&str>,
    ) -> EventCluster {
        EventCluster {
            id: Uuid::new_v4(),
            articles,
            similarity_scores: Vec::new(),
            event_type,
            dominant_ticker: dominant.map(|s| s.to_string()),
            canonical_index: 0,
            created_at: Utc::now(),
            merged_cross_ticker: false,
        }
    }

    fn settings(mode: Mode, holdings: &[&str]) -> UserSettings {
        UserSettings {
            user_id: "u1".to_string(),
            user_name: None,
            holdings: holdings
                .iter()
                .map(|s| HoldingRef {
                    symbol: s.to_string(),
                    name: None,
                })
                .collect(),
            frequency: crate::models::Frequency::Balanced,
            sensitivity: crate::models::Sensitivity::Curious,
            weekly_summary: false,
            mode,
        }
    }

    fn event_with_labels(
        article: &CleanedArticle,
        event_type: EventType,
        labels: Vec<ImpactLabel>,
    ) -> DetectedEvent {
        DetectedEvent {
            id: Uuid::new_v4(),
            cleaned_article_id: article.id,
            event_type,
            base_score: event_type.base_score(),
            dominant_ticker: article.clean_tickers.first().cloned(),
            confidence: 0.9,
            impact_labels: labels,
        }
    }

    #[test]
    fn test_focus_mode_drops_non_holdings() {
        let a = article("NVDA rips higher on earnings", "body", &["NVDA"], false);
        let events = HashMap::from([(a.id, event_with_labels(&a, EventType::Earnings, vec![]))]);
        let cluster = cluster_of(vec![a], EventType::Earnings, Some("NVDA"));

        assert!(score(&cluster, &settings(Mode::Focus, &["TSLA"]), &events).is_none());
        assert!(score(&cluster, &settings(Mode::Focus, &["NVDA"]), &events).is_some());
    }

    #[test]
    fn test_beginner_drops_rumor_unless_holdings() {
        let a = article("Merger rumor swirls around ACME", "body", &["AAPL"], false);
        let events = HashMap::from([(a.id, event_with_labels(&a, EventType::Rumor, vec![]))]);
        let cluster = cluster_of(vec![a], EventType::Rumor, Some("AAPL"));

        assert!(score(&cluster, &settings(Mode::Beginner, &[]), &events).is_none());
        // Held tickers are exempt from the rumor filter.
        assert!(score(&cluster, &settings(Mode::Beginner, &["AAPL"]), &events).is_some());
    }

    #[test]
    fn test_analyst_note_needs_strong_label() {
        let a = article("Analyst trims price target on MSFT", "body", &["MSFT"], false);
        let weak_events =
            HashMap::from([(a.id, event_with_labels(&a, EventType::AnalystNote, vec![]))]);
        let strong_events = HashMap::from([(
            a.id,
            event_with_labels(&a, EventType::AnalystNote, vec![ImpactLabel::BigMoves]),
        )]);
        let cluster = cluster_of(vec![a], EventType::AnalystNote, Some("MSFT"));

        assert!(score(&cluster, &settings(Mode::Smart, &[]), &weak_events).is_none());
        assert!(score(&cluster, &settings(Mode::Smart, &[]), &strong_events).is_some());
    }

    #[test]
    fn test_low_information_dropped() {
        let a = article("Something short happened today here", "tiny", &["AAPL"], true);
        let events = HashMap::from([(a.id, event_with_labels(&a, EventType::Earnings, vec![]))]);
        let cluster = cluster_of(vec![a], EventType::Earnings, Some("AAPL"));

        assert!(score(&cluster, &settings(Mode::Smart, &["AAPL"]), &events).is_none());
        // Focus mode keeps holdings clusters even when thin.
        assert!(score(&cluster, &settings(Mode::Focus, &["AAPL"]), &events).is_some());
    }

    #[test]
    fn test_total_is_weighted_sum_and_bounded() {
        let a = article("AAPL posts record earnings", "AAPL beat handily.", &["AAPL"], false);
        let events = HashMap::from([(
            a.id,
            event_with_labels(
                &a,
                EventType::Earnings,
                vec![ImpactLabel::BigMoves, ImpactLabel::Surprising],
            ),
        )]);
        let cluster = cluster_of(vec![a], EventType::Earnings, Some("AAPL"));

        let result = score(&cluster, &settings(Mode::Smart, &["AAPL"]), &events).unwrap();
        let expected = WEIGHT_HOLDINGS * result.breakdown.holdings_relevance
            + WEIGHT_IMPACT * result.breakdown.impact_label_score
            + WEIGHT_EVENT_TYPE * result.breakdown.event_type_weight
            + WEIGHT_RECENCY * result.breakdown.recency_score;
        assert!((result.total_score - expected).abs() < 1e-9);
        assert!(result.total_score >= 0.0 && result.total_score <= 1.0);
    }

    #[test]
    fn test_holdings_relevance_tiers() {
        let owned_in_title = article("AAPL posts record earnings", "body", &["AAPL"], false);
        let cluster = cluster_of(vec![owned_in_title], EventType::Earnings, Some("AAPL"));
        assert_eq!(holdings_relevance(&cluster, &settings(Mode::Smart, &["AAPL"])), 1.0);

        let owned_in_body = article(
            "Cupertino giant posts record quarter",
            "AAPL beat analyst numbers.",
            &["AAPL"],
            false,
        );
        let cluster = cluster_of(vec![owned_in_body], EventType::Earnings, Some("AAPL"));
        assert_eq!(holdings_relevance(&cluster, &settings(Mode::Smart, &["AAPL"])), 0.6);

        let not_owned = article("AAPL posts record earnings", "body", &["AAPL"], false);
        let cluster = cluster_of(vec![not_owned], EventType::Earnings, Some("AAPL"));
        // NVDA holder shares the technology sector with AAPL.
        assert_eq!(holdings_relevance(&cluster, &settings(Mode::Smart, &["NVDA"])), 0.3);
        // An energy holder does not.
        assert_eq!(holdings_relevance(&cluster, &settings(Mode::Smart, &["XOM"])), 0.0);

        let no_ticker = article(
            "Chip demand stays strong across the industry",
            "The semiconductor cycle keeps running.",
            &[],
            false,
        );
        let cluster = cluster_of(vec![no_ticker], EventType::Macro, None);
        assert_eq!(holdings_relevance(&cluster, &settings(Mode::Smart, &["NVDA"])), 0.3);
        assert_eq!(holdings_relevance(&cluster, &settings(Mode::Smart, &["XOM"])), 0.15);
    }

    #[test]
    fn test_recency_ladder() {
        assert_eq!(recency_score_hours(0.5), 1.0);
        assert_eq!(recency_score_hours(2.0), 0.9);
        assert_eq!(recency_score_hours(6.0), 0.75);
        assert_eq!(recency_score_hours(18.0), 0.6);
        assert_eq!(recency_score_hours(48.0), 0.4);
        assert_eq!(recency_score_hours(100.0), 0.2);
        assert_eq!(recency_score_hours(300.0), 0.1);
    }

    #[test]
    fn test_focus_post_filter() {
        // An old, weak-label holdings cluster in focus mode lands below 0.5
        // only if holdings relevance is low; here it is owned so it stays.
        let mut a = article("AAPL posts record earnings", "body", &["AAPL"], false);
        a.published_at = Utc::now() - Duration::days(10);
        let events = HashMap::from([(a.id, event_with_labels(&a, EventType::Earnings, vec![]))]);
        let mut cluster = cluster_of(vec![a], EventType::Earnings, Some("AAPL"));
        cluster.created_at = Utc::now() - Duration::days(10);

        let result = score(&cluster, &settings(Mode::Focus, &["AAPL"]), &events);
        assert!(result.is_some());
        assert!(result.unwrap().total_score >= FOCUS_MIN_SCORE);
    }

    #[test]
    fn test_impact_label_score_normalization() {
        let a = article("t", "b", &["AAPL"], false);
        let all_labels = ImpactLabel::ALL.to_vec();
        let events = HashMap::from([(
            a.id,
            event_with_labels(&a, EventType::Earnings, all_labels),
        )]);
        let cluster = cluster_of(vec![a], EventType::Earnings, Some("AAPL"));
        // Every label once = the full weight budget = exactly 1.0.
        assert!((impact_label_score(&cluster, &events) - 1.0).abs() < 1e-9);
    }
}
