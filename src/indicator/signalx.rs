//! HTTP client for the SignalX indicator service.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::IndicatorConfig;
use crate::error::{LegworkError, Result};

use super::{
    OptionChainEntry, OptionChainProvider, SupertrendQuery, SupertrendTick, TrendProvider,
};

const API_KEY_HEADER: &str = "X-API-KEY";

/// Client for the indicator service's supertrend and option-chain endpoints.
pub struct SignalxClient {
    http: reqwest::Client,
    config: IndicatorConfig,
}

impl SignalxClient {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct ExpiryResponse {
    expiry: String,
}

#[async_trait]
impl TrendProvider for SignalxClient {
    async fn supertrend(&self, query: &SupertrendQuery) -> Result<Vec<SupertrendTick>> {
        debug!(
            instrument_token = %query.instrument_token,
            interval = %query.interval,
            "Fetching supertrend"
        );
        let response = self
            .http
            .post(self.url("/api/indicator/supertrend"))
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl OptionChainProvider for SignalxClient {
    async fn option_chain(&self, instrument: &str, expiry: &str) -> Result<Vec<OptionChainEntry>> {
        let response = self
            .http
            .get(self.url("/api/option-chain"))
            .header(API_KEY_HEADER, &self.config.api_key)
            .query(&[("instrument", instrument), ("expiry", expiry)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn nearest_expiry(&self, instrument: &str) -> Result<String> {
        let response = self
            .http
            .get(self.url("/api/instruments/nearest-expiry"))
            .header(API_KEY_HEADER, &self.config.api_key)
            .query(&[("instrument", instrument)])
            .send()
            .await?
            .error_for_status()?;
        let body: ExpiryResponse = response.json().await?;
        if body.expiry.is_empty() {
            return Err(LegworkError::Validation(format!(
                "indicator service returned no expiry for {instrument}"
            )));
        }
        Ok(body.expiry)
    }
}
