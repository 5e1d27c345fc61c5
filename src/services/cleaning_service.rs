use chrono::{DateTime, NaiveDateTime, Utc};
use lingua::{Language, LanguageDetector, LanguageDetectorBuilder};
use regex::Regex;
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{normalize_url, CleanedArticle, RawArticle};
use crate::services::source_registry::SourceRegistry;

const MIN_TITLE_CHARS: usize = 30;
const MIN_BODY_CHARS: usize = 120;

/// Symbols we recognize when scanning article text. Kept deliberately small
/// and extensible through the TICKER_VOCAB env var.
const DEFAULT_TICKER_VOCAB: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "GOOG", "AMZN", "NVDA", "META", "TSLA", "BRK", "AVGO", "JPM", "V",
    "WMT", "XOM", "UNH", "MA", "PG", "JNJ", "ORCL", "HD", "COST", "ABBV", "BAC", "CRM", "KO",
    "NFLX", "AMD", "PEP", "TMO", "ADBE", "CSCO", "INTC", "QCOM", "TXN", "IBM", "GE", "CAT", "DIS",
    "VZ", "PFE", "NKE", "MCD", "ABT", "WFC", "DHR", "LLY", "CVX", "MRK", "T", "UPS", "MS", "GS",
    "BA", "SBUX", "UBER", "LYFT", "PYPL", "SQ", "SHOP", "SNAP", "PLTR", "COIN", "RIVN", "LCID",
    "F", "GM", "DAL", "UAL", "AAL", "MRNA", "BNTX", "GME", "AMC", "SPY", "QQQ", "ARM", "SMCI",
    "MU", "PANW", "SNOW", "NET",
];

/// Company names that resolve to a ticker even when the symbol itself never
/// appears. Lowercase single words; matched as whole tokens.
const NAME_ALIASES: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("microsoft", "MSFT"),
    ("alphabet", "GOOGL"),
    ("google", "GOOGL"),
    ("amazon", "AMZN"),
    ("nvidia", "NVDA"),
    ("meta", "META"),
    ("facebook", "META"),
    ("tesla", "TSLA"),
    ("netflix", "NFLX"),
    ("intel", "INTC"),
    ("boeing", "BA"),
    ("disney", "DIS"),
    ("starbucks", "SBUX"),
    ("uber", "UBER"),
];

/// Uppercase words that look like tickers but almost never are.
const TICKER_STOPLIST: &[&str] = &[
    "A", "I", "AN", "AT", "BE", "BY", "DO", "GO", "IF", "IN", "IS", "IT", "NO", "OF", "ON", "OR",
    "SO", "TO", "UP", "US", "WE", "THE", "AND", "FOR", "ARE", "BUT", "NOT", "YOU", "ALL", "CAN",
    "HAS", "HAD", "HOW", "NEW", "NOW", "OLD", "SEE", "TWO", "WAY", "WHO", "ITS", "LET", "SAY",
    "SHE", "TOO", "USE", "CEO", "CFO", "IPO", "ETF", "SEC", "FED", "GDP", "EPS", "USA", "EU",
    "UK", "AI", "NYSE", "WSJ",
];

/// Deterministic transform from raw to cleaned articles. Holds its compiled
/// machinery (language detector, regexes, vocabulary) and is cheap to share.
pub struct CleaningService {
    detector: LanguageDetector,
    ticker_re: Regex,
    boilerplate_res: Vec<Regex>,
    vocab: HashSet<String>,
    stoplist: HashSet<&'static str>,
}

impl CleaningService {
    pub fn new() -> Self {
        Self::with_extra_vocab(&[])
    }

    /// Extra symbols from the TICKER_VOCAB env var (comma-separated).
    pub fn from_env() -> Self {
        let extra: Vec<String> = std::env::var("TICKER_VOCAB")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self::with_extra_vocab(&extra)
    }

    pub fn with_extra_vocab(extra: &[String]) -> Self {
        let detector = LanguageDetectorBuilder::from_languages(&[
            Language::English,
            Language::Spanish,
            Language::German,
            Language::French,
        ])
        .build();

        let mut vocab: HashSet<String> =
            DEFAULT_TICKER_VOCAB.iter().map(|s| s.to_string()).collect();
        vocab.extend(extra.iter().map(|s| s.to_uppercase()));

        let boilerplate_res = [
            r"(?i)sign up for (our|the) newsletter",
            r"(?i)click here to (subscribe|read more)",
            r"(?i)this (article|story) (is|was) (auto-?generated|syndicated)",
            r"(?i)^\s*(market (wrap|roundup)|daily digest)\b",
            r"(?i)all rights reserved\.?\s*$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static boilerplate pattern"))
        .collect();

        Self {
            detector,
            ticker_re: Regex::new(r"\b[A-Z]{1,5}\b").expect("static ticker pattern"),
            boilerplate_res,
            vocab,
            stoplist: TICKER_STOPLIST.iter().copied().collect(),
        }
    }

    /// Derive the cleaned form of one raw article. Pure: no network, no
    /// clock reads beyond the fetch time already on the input, and malformed
    /// fields degrade to empty strings rather than errors.
    pub fn clean(&self, raw: &RawArticle, quality_score: f64) -> CleanedArticle {
        let clean_title = strip_markup(&raw.title);
        let clean_description = strip_markup(raw.description.as_deref().unwrap_or(""));
        let clean_body = strip_markup(raw.raw_body.as_deref().unwrap_or(""));

        let published_at = raw
            .published_at
            .as_deref()
            .and_then(parse_published_at)
            .unwrap_or(raw.fetch_time);

        let language = self.detect_language(&clean_title, &clean_body, &clean_description);

        let mut tickers = self.extract_tickers(&format!(
            "{} {} {}",
            clean_title, clean_description, clean_body
        ));
        if let Some(initial) = &raw.initial_tickers {
            for t in initial {
                let upper = t.to_uppercase();
                if !upper.is_empty() && !tickers.contains(&upper) {
                    tickers.push(upper);
                }
            }
        }
        tickers.sort();

        let is_low_information = clean_title.chars().count() < MIN_TITLE_CHARS
            || clean_body.chars().count() < MIN_BODY_CHARS
            || self.matches_boilerplate(&clean_body);

        CleanedArticle {
            id: Uuid::new_v4(),
            raw_article_id: raw.id,
            url: normalize_url(&raw.url),
            clean_title,
            clean_description,
            clean_body,
            clean_tickers: tickers,
            language,
            source: raw.source.clone(),
            source_quality_score: quality_score,
            published_at,
            author: raw.source_tag.clone(),
            source_category: None,
            is_holdings_news: raw.is_holdings_news,
            is_low_information,
        }
    }

    /// Convenience wrapper that looks the quality score up in the registry.
    pub fn clean_with_registry(
        &self,
        raw: &RawArticle,
        registry: &SourceRegistry,
    ) -> CleanedArticle {
        self.clean(raw, registry.quality(&raw.source))
    }

    fn detect_language(&self, title: &str, body: &str, description: &str) -> String {
        let sample = if body.len() >= 40 {
            body
        } else if description.len() >= 40 {
            description
        } else {
            title
        };

        match self.detector.detect_language_of(sample) {
            Some(Language::English) | None => "en".to_string(),
            Some(Language::Spanish) => "es".to_string(),
            Some(Language::German) => "de".to_string(),
            Some(Language::French) => "fr".to_string(),
        }
    }

    fn extract_tickers(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut tickers = Vec::new();
        for m in self.ticker_re.find_iter(text) {
            let token = m.as_str();
            if self.stoplist.contains(token) {
                continue;
            }
            if self.vocab.contains(token) && seen.insert(token.to_string()) {
                tickers.push(token.to_string());
            }
        }

        // Company names count too: "Alphabet and Meta..." resolves to
        // GOOGL and META even without an explicit symbol.
        let lower = text.to_lowercase();
        for word in lower.split(|c: char| !c.is_alphanumeric()) {
            if let Some((_, ticker)) = NAME_ALIASES.iter().find(|(name, _)| *name == word) {
                if seen.insert(ticker.to_string()) {
                    tickers.push(ticker.to_string());
                }
            }
        }

        tickers
    }

    fn matches_boilerplate(&self, body: &str) -> bool {
        self.boilerplate_res.iter().any(|re| re.is_match(body))
    }
}

impl Default for CleaningService {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip HTML markup, decode entities, and collapse whitespace. Plain text
/// passes through unchanged (idempotent).
fn strip_markup(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let text = if input.contains('<') || input.contains('&') {
        // Width only affects wrapping, which the whitespace collapse below
        // undoes anyway.
        html2text::from_read(input.as_bytes(), 500).unwrap_or_else(|_| input.to_string())
    } else {
        input.to_string()
    };

    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Try the known published-at formats in order: RFC 2822 (classic RSS),
/// RFC 3339 with and without fractional seconds, AlphaVantage's compact form,
/// then a bare datetime.
fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y%m%dT%H%M%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(title: &str, body: &str, published: Option<&str>) -> RawArticle {
        RawArticle {
            id: Uuid::new_v4(),
            source: "Reuters".to_string(),
            source_layer: 1,
            title: title.to_string(),
            raw_body: Some(body.to_string()),
            description: None,
            published_at: published.map(|s| s.to_string()),
            url: "https://example.com/Story?utm=rss".to_string(),
            initial_tickers: None,
            fetch_time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            is_holdings_news: false,
            source_tag: None,
        }
    }

    fn service() -> CleaningService {
        CleaningService::new()
    }

    #[test]
    fn test_strips_html_and_collapses_whitespace() {
        let article = raw(
            "Apple  <b>beats</b> estimates in quarterly report",
            "<p>Apple reported earnings.</p>\n\n<p>Shares of AAPL rose after the report, which beat analyst expectations for the quarter.</p>",
            None,
        );
        let cleaned = service().clean(&article, 1.0);
        assert_eq!(cleaned.clean_title, "Apple beats estimates in quarterly report");
        assert!(!cleaned.clean_body.contains('<'));
        assert!(!cleaned.clean_body.contains('\n'));
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        let article = raw(
            "Tesla <i>expands</i> factory capacity in a big way",
            "<p>TSLA is expanding its production lines again this year, adding capacity across several plants to meet growing delivery targets worldwide.</p>",
            Some("Mon, 02 Mar 2026 10:00:00 GMT"),
        );
        let svc = service();
        let first = svc.clean(&article, 1.0);

        let second_raw = RawArticle {
            title: first.clean_title.clone(),
            raw_body: Some(first.clean_body.clone()),
            description: Some(first.clean_description.clone()),
            ..article.clone()
        };
        let second = svc.clean(&second_raw, 1.0);

        assert_eq!(first.clean_title, second.clean_title);
        assert_eq!(first.clean_body, second.clean_body);
        assert_eq!(first.clean_tickers, second.clean_tickers);
    }

    #[test]
    fn test_date_formats_in_order() {
        let rfc822 = raw("t", "b", Some("Mon, 02 Mar 2026 10:00:00 GMT"));
        let iso = raw("t", "b", Some("2026-03-02T10:00:00Z"));
        let iso_frac = raw("t", "b", Some("2026-03-02T10:00:00.123Z"));
        let compact = raw("t", "b", Some("20260302T100000"));
        let garbage = raw("t", "b", Some("half past never"));

        let svc = service();
        let expected = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        assert_eq!(svc.clean(&rfc822, 1.0).published_at, expected);
        assert_eq!(svc.clean(&iso, 1.0).published_at, expected);
        assert_eq!(
            svc.clean(&iso_frac, 1.0).published_at.timestamp(),
            expected.timestamp()
        );
        assert_eq!(svc.clean(&compact, 1.0).published_at, expected);
        // Unparseable dates fall back to fetch time.
        assert_eq!(
            svc.clean(&garbage, 1.0).published_at,
            garbage.fetch_time
        );
    }

    #[test]
    fn test_ticker_extraction_respects_vocab_and_stoplist() {
        let article = raw(
            "THE CEO OF AAPL AND MSFT SAY IT IS A NEW DAY",
            "Long enough body talking about NVDA and some unknown token ZZZZZ, with enough characters to clear the low-information threshold easily for this test.",
            None,
        );
        let cleaned = service().clean(&article, 1.0);
        assert_eq!(cleaned.clean_tickers, vec!["AAPL", "MSFT", "NVDA"]);
    }

    #[test]
    fn test_company_name_aliases_resolve_to_tickers() {
        let article = raw(
            "Alphabet and Meta announce AI chip partnership",
            "The two companies will co-develop custom silicon for data centers, sharing design work and manufacturing capacity over several years of the agreement.",
            None,
        );
        let cleaned = service().clean(&article, 1.0);
        assert!(cleaned.clean_tickers.contains(&"GOOGL".to_string()));
        assert!(cleaned.clean_tickers.contains(&"META".to_string()));
    }

    #[test]
    fn test_initial_tickers_are_unioned() {
        let mut article = raw(
            "A perfectly ordinary market story headline",
            "Body without any ticker symbols in it at all, but long enough that the low-information flag does not trip for body length reasons here.",
            None,
        );
        article.initial_tickers = Some(vec!["shop".to_string()]);
        let cleaned = service().clean(&article, 0.6);
        assert_eq!(cleaned.clean_tickers, vec!["SHOP"]);
    }

    #[test]
    fn test_low_information_flags() {
        let short_title = raw(
            "Tiny headline",
            "A body that is certainly long enough to pass the one hundred twenty character body-length threshold used by the low information detector.",
            None,
        );
        assert!(service().clean(&short_title, 1.0).is_low_information);

        let short_body = raw(
            "A headline that is comfortably longer than thirty characters",
            "Too short.",
            None,
        );
        assert!(service().clean(&short_body, 1.0).is_low_information);

        let boilerplate = raw(
            "A headline that is comfortably longer than thirty characters",
            "Markets moved today. Sign up for our newsletter to get this digest in your inbox every weekday morning, plus exclusive extras and more.",
            None,
        );
        assert!(service().clean(&boilerplate, 1.0).is_low_information);

        let fine = raw(
            "A headline that is comfortably longer than thirty characters",
            "A real story body with plenty of substance, detail, and reporting that easily clears every one of the low-information heuristics in use.",
            None,
        );
        assert!(!service().clean(&fine, 1.0).is_low_information);
    }

    #[test]
    fn test_quality_score_copied_from_registry() {
        let registry = SourceRegistry::new();
        let article = raw("t", "b", None);
        let cleaned = service().clean_with_registry(&article, &registry);
        assert_eq!(cleaned.source_quality_score, registry.quality("Reuters"));
    }

    #[test]
    fn test_url_normalized() {
        let article = raw("t", "b", None);
        let cleaned = service().clean(&article, 1.0);
        assert_eq!(cleaned.url, "https://example.com/story");
    }

    #[test]
    fn test_empty_fields_do_not_panic() {
        let mut article = raw("", "", None);
        article.raw_body = None;
        let cleaned = service().clean(&article, 0.5);
        assert!(cleaned.clean_title.is_empty());
        assert!(cleaned.clean_body.is_empty());
        assert!(cleaned.is_low_information);
    }
}
