use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use super::types::{ApiErrorResponse, CandleRow, OhlcResponse, SourceInfo};
use super::{CandleWindow, DataSource, WindowQuery};
use crate::error::SourceError;
use crate::model::{Candle, Timeframe};

const QUERY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// [`DataSource`] backed by the candle HTTP API.
pub struct HttpDataSource {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpDataSource {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, SourceError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| SourceError::Malformed(format!("invalid base url '{}': {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, SourceError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| SourceError::Malformed(format!("invalid endpoint '{}': {}", path, e)))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        tracing::trace!(url = %url, "GET");
        let resp = self.http.get(url.clone()).send().await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(url = %url, "source reports no data");
            return Err(SourceError::NotFound);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(err) => err.detail,
                Err(_) => body,
            };
            return Err(SourceError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Connectivity check against the API root.
    pub async fn ping(&self) -> Result<(), SourceError> {
        let url = self.endpoint("", &[])?;
        self.http.get(url).send().await?.error_for_status()?;
        Ok(())
    }

    /// Store statistics from `GET /info`.
    pub async fn info(&self) -> Result<SourceInfo, SourceError> {
        let url = self.endpoint("info", &[])?;
        self.get_json(url).await
    }
}

fn format_query_time(epoch_secs: i64) -> Result<String, SourceError> {
    chrono::DateTime::from_timestamp(epoch_secs, 0)
        .map(|dt| dt.format(QUERY_TIME_FORMAT).to_string())
        .ok_or_else(|| SourceError::Malformed(format!("epoch {} out of range", epoch_secs)))
}

fn window_params(
    symbol: &str,
    timeframe: Timeframe,
    query: &WindowQuery,
) -> Result<Vec<(&'static str, String)>, SourceError> {
    let mut params = vec![
        ("symbol", symbol.to_string()),
        ("timeframe", timeframe.to_string()),
        ("limit", query.limit.to_string()),
    ];
    if let Some(start) = query.start_time {
        params.push(("start_time", format_query_time(start)?));
    }
    if let Some(end) = query.end_time {
        params.push(("end_time", format_query_time(end)?));
    }
    if query.completed_only {
        params.push(("completed_only", "true".to_string()));
    }
    Ok(params)
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn list_symbols(&self) -> Result<Vec<String>, SourceError> {
        let url = self.endpoint("symbols", &[])?;
        self.get_json(url).await
    }

    async fn list_timeframes(&self, symbol: &str) -> Result<Vec<Timeframe>, SourceError> {
        let url = self.endpoint("timeframes", &[("symbol", symbol.to_string())])?;
        let labels: Vec<String> = self.get_json(url).await?;
        // The store may hold tables this client does not know how to draw.
        Ok(labels
            .iter()
            .filter_map(|label| match label.parse::<Timeframe>() {
                Ok(tf) => Some(tf),
                Err(_) => {
                    tracing::debug!(symbol, label = %label, "skipping unknown timeframe");
                    None
                }
            })
            .collect())
    }

    async fn get_window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        query: &WindowQuery,
    ) -> Result<CandleWindow, SourceError> {
        let url = self.endpoint("ohlc", &window_params(symbol, timeframe, query)?)?;
        let resp: OhlcResponse = self.get_json(url).await?;
        Ok(resp.into())
    }

    async fn get_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Candle, SourceError> {
        let url = self.endpoint(
            "latest",
            &[
                ("symbol", symbol.to_string()),
                ("timeframe", timeframe.to_string()),
            ],
        )?;
        let row: CandleRow = self.get_json(url).await?;
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_path() {
        let source = HttpDataSource::new("http://localhost:8000/api", Duration::from_secs(1)).unwrap();
        let url = source
            .endpoint("latest", &[("symbol", "EURUSD".to_string())])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/latest?symbol=EURUSD");
    }

    #[test]
    fn window_params_format_times_as_utc_strings() {
        let query = WindowQuery {
            limit: 500,
            start_time: Some(1_704_164_640),
            end_time: None,
            completed_only: true,
        };
        let params = window_params("EURUSD", Timeframe::M5, &query).unwrap();
        assert!(params.contains(&("timeframe", "M5".to_string())));
        assert!(params.contains(&("limit", "500".to_string())));
        assert!(params.contains(&("start_time", "2024-01-02 03:04:00".to_string())));
        assert!(params.contains(&("completed_only", "true".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "end_time"));
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(HttpDataSource::new("not a url", Duration::from_secs(1)).is_err());
    }
}
