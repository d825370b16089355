// =============================================================================
// RIT REST API Client — case, securities, news and history endpoints
// =============================================================================
//
// The API key is sent as a default header on every request and is never
// logged. Each request carries the configured timeout; retry and backoff are
// left to the next poll.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::rit::payload::{
    news_oldest_first, CasePayload, HistoryEnvelope, NewsPayload, SecurityPayload,
};
use crate::rit::{FetchPlan, TickSource};
use crate::runtime_config::RuntimeConfig;
use crate::types::{Endpoint, EndpointFailure, FetchBatch, Tick};

/// Client for the trading-simulation REST API.
pub struct RitClient {
    base_url: String,
    client: reqwest::Client,
    /// Configured ticker, or the first one the API reported.
    ticker: RwLock<Option<String>>,
    tick_limit_fallback: Option<i64>,
}

impl RitClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        if !config.api_key.is_empty() {
            let name = HeaderName::from_bytes(config.auth_header.as_bytes())
                .with_context(|| format!("invalid auth header name {:?}", config.auth_header))?;
            let value =
                HeaderValue::from_str(&config.api_key).context("API key is not a valid header value")?;
            default_headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %config.api_base_url, "RitClient initialised");

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
            ticker: RwLock::new(config.ticker.clone()),
            tick_limit_fallback: config.tick_limit_fallback,
        })
    }

    pub fn ticker(&self) -> Option<String> {
        self.ticker.read().clone()
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET {path} returned {status}: {body}");
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("failed to parse {path} response"))
    }

    // -------------------------------------------------------------------------
    // Endpoints
    // -------------------------------------------------------------------------

    /// GET /case
    #[instrument(skip(self), name = "rit::get_case")]
    pub async fn get_case(&self) -> Result<CasePayload> {
        self.get_json("/case", &[]).await
    }

    /// GET /securities
    #[instrument(skip(self), name = "rit::get_securities")]
    pub async fn get_securities(&self) -> Result<Vec<SecurityPayload>> {
        self.get_json("/securities", &[]).await
    }

    /// GET /news, optionally only items after `since`.
    #[instrument(skip(self), name = "rit::get_news")]
    pub async fn get_news(&self, since: Option<i64>) -> Result<Vec<NewsPayload>> {
        let query: Vec<(&str, String)> = since.map(|s| ("since", s.to_string())).into_iter().collect();
        self.get_json("/news", &query).await
    }

    /// GET /securities/history
    #[instrument(skip(self), name = "rit::get_history")]
    pub async fn get_history(&self, ticker: &str, limit: usize) -> Result<HistoryEnvelope> {
        self.get_json(
            "/securities/history",
            &[("ticker", ticker.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    /// Last traded price of the tracked ticker, resolving the ticker from the
    /// first listed security when none is configured.
    pub async fn last_price(&self) -> Result<(String, Option<f64>)> {
        let securities = self.get_securities().await?;
        let wanted = self.ticker();

        let security = match wanted.as_deref() {
            Some(t) => securities
                .into_iter()
                .find(|s| s.ticker.as_deref() == Some(t))
                .with_context(|| format!("ticker {t} not found in /securities"))?,
            None => securities
                .into_iter()
                .find(|s| s.ticker.is_some())
                .context("/securities listed no tickers")?,
        };

        let ticker = security.ticker.unwrap_or_default();
        if wanted.is_none() {
            debug!(ticker = %ticker, "tracking first listed ticker");
            *self.ticker.write() = Some(ticker.clone());
        }
        Ok((ticker, security.last))
    }

    async fn backfill(&self, limit: usize) -> Result<Vec<Tick>> {
        let ticker = match self.ticker() {
            Some(t) => t,
            None => self.last_price().await?.0,
        };
        Ok(self.get_history(&ticker, limit).await?.into_ticks())
    }
}

impl TickSource for RitClient {
    async fn fetch_batch(&self, plan: FetchPlan) -> Result<FetchBatch> {
        let mut batch = FetchBatch::default();

        let (case, price, news) = tokio::join!(
            async {
                if plan.status {
                    Some(self.get_case().await)
                } else {
                    None
                }
            },
            async {
                if plan.price {
                    Some(self.last_price().await)
                } else {
                    None
                }
            },
            async {
                if plan.news {
                    Some(self.get_news(plan.news_since).await)
                } else {
                    None
                }
            },
        );

        match case {
            Some(Ok(case)) => batch.status = Some(case.into_raw_status(self.tick_limit_fallback)),
            Some(Err(e)) => record_failure(&mut batch, Endpoint::Case, e),
            None => {}
        }

        match price {
            Some(Ok((ticker, last))) => {
                batch.ticker = Some(ticker);
                batch.last_price = last;
            }
            Some(Err(e)) => record_failure(&mut batch, Endpoint::Securities, e),
            None => {}
        }

        match news {
            Some(Ok(items)) => batch.news = news_oldest_first(items),
            Some(Err(e)) => record_failure(&mut batch, Endpoint::News, e),
            None => {}
        }

        if let Some(limit) = plan.backfill {
            match self.backfill(limit).await {
                Ok(ticks) => {
                    debug!(rows = ticks.len(), "history backfill fetched");
                    batch.backfill = ticks;
                }
                Err(e) => record_failure(&mut batch, Endpoint::History, e),
            }
        }

        Ok(batch)
    }
}

fn record_failure(batch: &mut FetchBatch, endpoint: Endpoint, err: anyhow::Error) {
    let message = format!("{err:#}");
    warn!(%endpoint, error = %message, "upstream fetch failed");
    batch.errors.push(EndpointFailure { endpoint, message });
}
