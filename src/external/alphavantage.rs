use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::RawArticle;

#[derive(Debug, Error)]
pub enum NewsSearchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("api key not configured")]
    Unconfigured,
}

/// Supplemental (L3) search API over recent news for a set of tickers.
#[async_trait]
pub trait NewsSearchApi: Send + Sync {
    async fn search(&self, tickers: &[String], limit: usize)
        -> Result<Vec<RawArticle>, NewsSearchError>;
}

pub struct AlphaVantageNewsApi {
    client: reqwest::Client,
    api_key: String,
    source_name: String,
}

impl AlphaVantageNewsApi {
    pub fn from_env(source_name: &str) -> Result<Self, NewsSearchError> {
        let api_key =
            std::env::var("ALPHAVANTAGE_API_KEY").map_err(|_| NewsSearchError::Unconfigured)?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            source_name: source_name.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AvNewsResponse {
    feed: Option<Vec<AvNewsItem>>,

    // When rate-limited Alpha Vantage answers 200 with a "Note" body.
    #[serde(rename = "Note")]
    note: Option<String>,

    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvNewsItem {
    title: String,
    url: String,
    time_published: Option<String>,
    summary: Option<String>,
    authors: Option<Vec<String>>,
    ticker_sentiment: Option<Vec<AvTickerSentiment>>,
}

#[derive(Debug, Deserialize)]
struct AvTickerSentiment {
    ticker: String,
}

#[async_trait]
impl NewsSearchApi for AlphaVantageNewsApi {
    async fn search(
        &self,
        tickers: &[String],
        limit: usize,
    ) -> Result<Vec<RawArticle>, NewsSearchError> {
        let ticker_param = if tickers.is_empty() {
            String::new()
        } else {
            format!("&tickers={}", tickers.join(","))
        };
        let url = format!(
            "https://www.alphavantage.co/query?function=NEWS_SENTIMENT{}&limit={}&sort=LATEST&apikey={}",
            ticker_param,
            limit.min(1000),
            self.api_key
        );

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NewsSearchError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(NewsSearchError::RateLimited);
        }

        let body = resp
            .json::<AvNewsResponse>()
            .await
            .map_err(|e| NewsSearchError::BadResponse(e.to_string()))?;

        if body.note.is_some() {
            return Err(NewsSearchError::RateLimited);
        }
        if let Some(msg) = body.error_message {
            return Err(NewsSearchError::BadResponse(msg));
        }

        let now = Utc::now();
        let articles = body
            .feed
            .unwrap_or_default()
            .into_iter()
            .map(|item| {
                let initial_tickers = item.ticker_sentiment.map(|ts| {
                    ts.into_iter()
                        .map(|t| t.ticker.to_uppercase())
                        .collect::<Vec<_>>()
                });

                RawArticle {
                    id: Uuid::new_v4(),
                    source: self.source_name.clone(),
                    source_layer: 3,
                    title: item.title,
                    raw_body: None,
                    description: item.summary,
                    published_at: item.time_published,
                    url: item.url,
                    initial_tickers,
                    fetch_time: now,
                    is_holdings_news: false,
                    source_tag: item.authors.and_then(|a| a.into_iter().next()),
                }
            })
            .collect();

        Ok(articles)
    }
}
