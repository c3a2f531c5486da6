//! DataWars2 hourly trading post history.
//!
//! API: `GET https://api.datawars2.ie/gw2/v2/history/hourly/json`
//! Query: `itemID=<id,id,...>&start=<RFC3339>&end=<RFC3339>`
//! Prices are in copper. Fields may be null or missing on sparse items.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::http::{build_client, get_with_retry, RetryPolicy};
use super::SourceError;
use crate::jobs::StatusLog;
use crate::model::HistoricalSummary;
use crate::stats;

const BASE_URL: &str = "https://api.datawars2.ie/gw2/v2/history/hourly/json";

/// Items per request; the API answers slowly for larger id lists.
pub const BATCH_SIZE: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HourlyRecord {
    #[serde(rename = "itemID", deserialize_with = "lenient_id")]
    pub item_id: String,
    #[serde(default)]
    pub date: String,

    #[serde(default, deserialize_with = "lenient_num")]
    pub buy_price_max: f64,
    #[serde(default, deserialize_with = "lenient_num")]
    pub sell_price_min: f64,

    #[serde(default, deserialize_with = "lenient_num")]
    pub buy_listed: f64,
    #[serde(default, deserialize_with = "lenient_num")]
    pub buy_sold: f64,
    #[serde(default, deserialize_with = "lenient_num")]
    pub sell_listed: f64,
    #[serde(default, deserialize_with = "lenient_num")]
    pub sell_sold: f64,

    #[serde(default, deserialize_with = "lenient_num")]
    pub buy_quantity: f64,
    #[serde(default, deserialize_with = "lenient_num")]
    pub sell_quantity: f64,
}

fn lenient_num<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    Ok(match v {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    Ok(match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

pub struct DataWarsClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl DataWarsClient {
    pub fn new() -> Result<Self, SourceError> {
        Ok(Self {
            http: build_client(std::time::Duration::from_secs(10))?,
            base_url: BASE_URL.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn fetch_hourly(
        &self,
        item_ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: &StatusLog,
    ) -> Result<Vec<HourlyRecord>, SourceError> {
        let ids = item_ids.join(",");
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = end.to_rfc3339_opts(SecondsFormat::Secs, true);
        debug!(ids = %ids, "Fetching DataWars2 history");

        let resp = get_with_retry(&self.retry, status, "DataWars2 history", || {
            self.http
                .get(&self.base_url)
                .query(&[("itemID", ids.as_str()), ("start", start.as_str()), ("end", end.as_str())])
        })?;

        let body = resp.text().map_err(SourceError::Http)?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body).map_err(|e| SourceError::Decode(format!("DataWars2 history: {e}")))
    }

    /// History summaries for all `item_ids`, fetched in batches of [`BATCH_SIZE`].
    /// A failed batch is logged and skipped.
    pub fn summaries(
        &self,
        item_ids: &[String],
        days: u32,
        status: &StatusLog,
    ) -> HashMap<String, HistoricalSummary> {
        let end = Utc::now();
        let start = end - Duration::days(i64::from(days.max(1)));

        let mut out = HashMap::new();
        for batch in item_ids.chunks(BATCH_SIZE) {
            status.post(format!("Fetching DataWars2 data for items: {}", batch.join(", ")));
            match self.fetch_hourly(batch, start, end, status) {
                Ok(records) => out.extend(stats::summarize(&records)),
                Err(e) => {
                    warn!(error = %e, "History batch failed");
                    status.post(format!("Failed to get data for items {batch:?}: {e}"));
                }
            }
        }
        out
    }
}
