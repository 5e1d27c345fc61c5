use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{CleanedArticle, DetectedEvent, EventType, ImpactLabel};
use crate::services::llm_service::LlmService;

/// Articles are classified in concurrent batches of this size.
const DETECTION_BATCH: usize = 10;

/// Classifies cleaned articles into event types and attaches impact labels.
/// LLM-preferred with a deterministic keyword fallback; the rule pass for
/// impact labels always runs and the LLM's labels are unioned in.
pub struct EventDetectionService {
    llm: Arc<LlmService>,
}

impl EventDetectionService {
    pub fn new(llm: Arc<LlmService>) -> Self {
        Self { llm }
    }

    /// Detect every article, ten at a time. Returns the events plus how many
    /// LLM calls fell back to rules.
    pub async fn detect_all(
        &self,
        articles: &[CleanedArticle],
        holdings: &[String],
    ) -> (Vec<DetectedEvent>, usize) {
        let mut events = Vec::with_capacity(articles.len());
        let mut llm_failures = 0usize;

        for batch in articles.chunks(DETECTION_BATCH) {
            let futures: Vec<_> = batch.iter().map(|a| self.detect(a, holdings)).collect();
            for (event, fell_back) in join_all(futures).await {
                if fell_back {
                    llm_failures += 1;
                }
                events.push(event);
            }
        }

        (events, llm_failures)
    }

    /// Classify one article. The bool reports whether an LLM attempt failed
    /// and the rule fallback was used instead.
    pub async fn detect(
        &self,
        article: &CleanedArticle,
        holdings: &[String],
    ) -> (DetectedEvent, bool) {
        let text = combined_text(article);

        let (event_type, llm_fell_back) = if self.llm.is_enabled() {
            match self
                .llm
                .classify_event_type(
                    &article.clean_title,
                    &article.clean_description,
                    &article.clean_body,
                )
                .await
            {
                Ok(event_type) => (event_type, false),
                Err(e) => {
                    debug!("LLM classification failed ({}), using rules", e);
                    (rule_classify(&text), true)
                }
            }
        } else {
            (rule_classify(&text), false)
        };

        let mut impact_labels = rule_labels(&text);
        if self.llm.is_enabled() {
            if let Ok(llm_labels) = self
                .llm
                .label_impacts(&article.clean_title, &article.clean_description)
                .await
            {
                for label in llm_labels {
                    if !impact_labels.contains(&label) {
                        impact_labels.push(label);
                    }
                }
            }
        }

        let event = DetectedEvent {
            id: Uuid::new_v4(),
            cleaned_article_id: article.id,
            event_type,
            base_score: event_type.base_score(),
            dominant_ticker: pick_dominant_ticker(article, holdings),
            confidence: confidence_for(article),
            impact_labels,
        };

        (event, llm_fell_back)
    }
}

fn combined_text(article: &CleanedArticle) -> String {
    format!(
        "{} {} {}",
        article.clean_title, article.clean_description, article.clean_body
    )
    .to_lowercase()
}

/// First extracted ticker, preferring one the user actually holds.
fn pick_dominant_ticker(article: &CleanedArticle, holdings: &[String]) -> Option<String> {
    article
        .clean_tickers
        .iter()
        .find(|t| holdings.contains(t))
        .or_else(|| article.clean_tickers.first())
        .cloned()
}

/// Confidence starts at 0.7 and earns a tenth for substance, tickers, and
/// source quality. Capped at 1.0.
fn confidence_for(article: &CleanedArticle) -> f64 {
    let mut confidence: f64 = 0.7;
    if article.clean_body.chars().count() >= 200 {
        confidence += 0.1;
    }
    if !article.clean_tickers.is_empty() {
        confidence += 0.1;
    }
    if article.source_quality_score >= 0.8 {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

// ==============================================================================
// Rule fallback
// ==============================================================================

/// Keyword heuristics in fixed priority order; first match wins and
/// everything else is fluff.
pub fn rule_classify(lower_text: &str) -> EventType {
    const RULES: &[(EventType, &[&str])] = &[
        (
            EventType::Earnings,
            &[
                "earnings",
                "quarterly results",
                "quarterly report",
                "beats estimates",
                "misses estimates",
                "eps of",
                "revenue of",
                "profit fell",
                "profit rose",
            ],
        ),
        (
            EventType::Guidance,
            &[
                "guidance",
                "outlook",
                "full-year forecast",
                "raises forecast",
                "cuts forecast",
                "lowered its forecast",
            ],
        ),
        (
            EventType::ProductLaunch,
            &[
                "launches",
                "launch of",
                "unveils",
                "introduces",
                "debuts",
                "announces new",
                "rolls out",
            ],
        ),
        (
            EventType::MergerAcquisition,
            &[
                "acquisition",
                "acquires",
                "to acquire",
                "merger",
                "buyout",
                "takeover",
                "to buy",
            ],
        ),
        (
            EventType::Regulation,
            &[
                "regulator",
                "regulation",
                "antitrust",
                "probe",
                "ftc",
                "doj",
                "fined",
                "banned",
                "compliance order",
            ],
        ),
        (
            EventType::Litigation,
            &[
                "lawsuit", "sues", "sued", "settlement", "court ruling", "judge", "jury",
            ],
        ),
        (
            EventType::AnalystNote,
            &[
                "upgrade",
                "downgrade",
                "price target",
                "analyst",
                "initiates coverage",
                "rating",
            ],
        ),
        (
            EventType::Macro,
            &[
                "federal reserve",
                "fed ",
                "inflation",
                "cpi",
                "gdp",
                "jobs report",
                "interest rate",
                "tariff",
                "unemployment",
            ],
        ),
        (
            EventType::SocialSentiment,
            &[
                "reddit",
                "wallstreetbets",
                "social media",
                "meme stock",
                "trending",
                "viral",
            ],
        ),
        (
            EventType::Rumor,
            &[
                "rumor",
                "reportedly",
                "sources say",
                "unconfirmed",
                "speculation",
                "leaked",
            ],
        ),
    ];

    for (event_type, keywords) in RULES {
        if keywords.iter().any(|k| lower_text.contains(k)) {
            return *event_type;
        }
    }
    EventType::Fluff
}

/// Keyword dictionaries for impact labels. Runs on every article.
pub fn rule_labels(lower_text: &str) -> Vec<ImpactLabel> {
    const LABEL_RULES: &[(ImpactLabel, &[&str])] = &[
        (
            ImpactLabel::AllTimeHigh,
            &["all-time high", "record high", "highest ever"],
        ),
        (
            ImpactLabel::AllTimeLow,
            &["all-time low", "record low", "lowest ever"],
        ),
        (
            ImpactLabel::PriceAffectingAbnormal,
            &["trading halted", "halted", "crash", "flash crash", "circuit breaker"],
        ),
        (
            ImpactLabel::BigMoves,
            &["surge", "surges", "plunge", "plunges", "jumps", "tumbles", "soars", "sinks", "rallies"],
        ),
        (
            ImpactLabel::MostImpactful,
            &["historic", "biggest", "record-breaking", "landmark", "unprecedented"],
        ),
        (
            ImpactLabel::Surprising,
            &["surprise", "unexpected", "shock", "stuns", "out of nowhere"],
        ),
        (
            ImpactLabel::Drama,
            &["feud", "scandal", "chaos", "turmoil", "clash", "drama"],
        ),
        (
            ImpactLabel::StockPopularity,
            &["most traded", "most popular", "heavily traded", "most searched"],
        ),
    ];

    LABEL_RULES
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower_text.contains(k)))
        .map(|(label, _)| *label)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(title: &str, body: &str, tickers: &[&str], quality: f64) -> CleanedArticle {
        CleanedArticle {
            id: Uuid::new_v4(),
            raw_article_id: Uuid::new_v4(),
            url: "https://example.com/a".to_string(),
            clean_title: title.to_string(),
            clean_description: String::new(),
            clean_body: body.to_string(),
            clean_tickers: tickers.iter().map(|s| s.to_string()).collect(),
            language: "en".to_string(),
            source: "Reuters".to_string(),
            source_quality_score: quality,
            published_at: Utc::now(),
            author: None,
            source_category: None,
            is_holdings_news: false,
            is_low_information: false,
        }
    }

    #[test]
    fn test_rule_priority_earnings_beats_analyst() {
        // Contains both "earnings" and "analyst"; earnings has priority.
        let text = "analyst reacts to blowout earnings";
        assert_eq!(rule_classify(text), EventType::Earnings);
    }

    #[test]
    fn test_rule_fallthrough_to_fluff() {
        assert_eq!(
            rule_classify("ten office snacks our staff loved this week"),
            EventType::Fluff
        );
    }

    #[test]
    fn test_rule_each_type() {
        assert_eq!(rule_classify("company cuts forecast for 2026"), EventType::Guidance);
        assert_eq!(rule_classify("firm unveils a new chip"), EventType::ProductLaunch);
        assert_eq!(rule_classify("megacorp to acquire startup"), EventType::MergerAcquisition);
        assert_eq!(rule_classify("antitrust probe widens"), EventType::Regulation);
        assert_eq!(rule_classify("shareholders file lawsuit"), EventType::Litigation);
        assert_eq!(rule_classify("bank raises price target"), EventType::AnalystNote);
        assert_eq!(rule_classify("inflation cooled last month"), EventType::Macro);
        assert_eq!(rule_classify("wallstreetbets piles in"), EventType::SocialSentiment);
        assert_eq!(rule_classify("reportedly exploring options"), EventType::Rumor);
    }

    #[test]
    fn test_rule_labels() {
        let labels = rule_labels("shares surge to an all-time high in a surprise rally");
        assert!(labels.contains(&ImpactLabel::BigMoves));
        assert!(labels.contains(&ImpactLabel::AllTimeHigh));
        assert!(labels.contains(&ImpactLabel::Surprising));
        assert!(!labels.contains(&ImpactLabel::Drama));
    }

    #[test]
    fn test_confidence_accumulates_and_caps() {
        let long_body = "x".repeat(250);
        let maxed = article("t", &long_body, &["AAPL"], 0.9);
        assert!((confidence_for(&maxed) - 1.0).abs() < 1e-9);

        let bare = article("t", "short", &[], 0.5);
        assert!((confidence_for(&bare) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_dominant_ticker_prefers_holdings() {
        let a = article("t", "b", &["AAPL", "TSLA"], 1.0);
        assert_eq!(
            pick_dominant_ticker(&a, &["TSLA".to_string()]),
            Some("TSLA".to_string())
        );
        assert_eq!(pick_dominant_ticker(&a, &[]), Some("AAPL".to_string()));
        let none = article("t", "b", &[], 1.0);
        assert_eq!(pick_dominant_ticker(&none, &[]), None);
    }

    #[tokio::test]
    async fn test_detect_all_without_llm() {
        let svc = EventDetectionService::new(Arc::new(LlmService::disabled()));
        let articles = vec![
            article("Apple earnings beat estimates", "long body about earnings", &["AAPL"], 1.0),
            article("A quiet day", "nothing to see", &[], 0.6),
        ];
        let (events, llm_failures) = svc.detect_all(&articles, &[]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(llm_failures, 0);
        assert_eq!(events[0].event_type, EventType::Earnings);
        assert_eq!(events[0].base_score, EventType::Earnings.base_score());
        assert_eq!(events[1].event_type, EventType::Fluff);
    }
}
