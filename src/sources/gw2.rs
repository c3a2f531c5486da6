//! Official Guild Wars 2 API: account trading post history and item names.
//!
//! Base URL: https://api.guildwars2.com/v2
//! Auth: `Authorization: Bearer <key>` (key needs the `tradingpost` scope).
//! Pagination: `page` (0-based) + `page_size` (max 200).

use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::http::{build_client, get_with_retry, RetryPolicy};
use super::SourceError;
use crate::jobs::StatusLog;

const BASE_URL: &str = "https://api.guildwars2.com/v2";

pub const PAGE_SIZE: usize = 200;
const ITEM_BATCH: usize = 200;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub item_id: u32,
    pub price: u64,  // copper, per unit
    pub quantity: u64,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub purchased: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buys,
    Sells,
}

impl Side {
    fn path(self) -> &'static str {
        match self {
            Side::Buys => "buys",
            Side::Sells => "sells",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemInfo {
    id: u32,
    name: String,
}

pub struct Gw2Client {
    http: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl Gw2Client {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SourceError> {
        Ok(Self {
            http: build_client(Duration::from_secs(20))?,
            base_url: BASE_URL.to_string(),
            api_key: api_key.into(),
            retry: RetryPolicy::none(),
        })
    }

    /// All pages of completed buys or sells. Pagination stops at an empty or
    /// short page; a failing page ends it early with what was collected.
    pub fn transactions(&self, side: Side, status: &StatusLog) -> Vec<Transaction> {
        let url = format!("{}/commerce/transactions/history/{}", self.base_url, side.path());
        let mut all = Vec::new();
        let mut page = 0usize;

        loop {
            let batch = match self.transaction_page(&url, page, status) {
                Ok(b) => b,
                Err(e) => {
                    warn!(page, side = side.path(), error = %e, "Transaction page failed");
                    status.post(format!("Error fetching page {page} from {}: {e}", side.path()));
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            let short = batch.len() < PAGE_SIZE;
            all.extend(batch);
            status.post(format!("Fetched page {} of transactions from {}...", page + 1, side.path()));
            if short {
                break;
            }
            page += 1;
        }

        all
    }

    fn transaction_page(&self, url: &str, page: usize, status: &StatusLog) -> Result<Vec<Transaction>, SourceError> {
        debug!(url, page, "Fetching transactions");
        let resp = get_with_retry(&self.retry, status, "Transaction history", || {
            self.http
                .get(url)
                .bearer_auth(&self.api_key)
                .query(&[("page", page), ("page_size", PAGE_SIZE)])
        })?;
        resp.json().map_err(|e| SourceError::Decode(format!("transaction page {page}: {e}")))
    }

    /// Names for `ids`; anything the API does not return is named `Item <id>`.
    pub fn item_names(&self, ids: &[u32], status: &StatusLog) -> HashMap<u32, String> {
        let mut unique: Vec<u32> = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut names = HashMap::new();
        for batch in unique.chunks(ITEM_BATCH) {
            match self.item_batch(batch, status) {
                Ok(items) => names.extend(items.into_iter().map(|i| (i.id, i.name))),
                Err(e) => status.post(format!("Error fetching item names for {} items: {e}", batch.len())),
            }
        }

        for id in unique {
            names.entry(id).or_insert_with(|| format!("Item {id}"));
        }
        names
    }

    fn item_batch(&self, ids: &[u32], status: &StatusLog) -> Result<Vec<ItemInfo>, SourceError> {
        let joined = ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        let url = format!("{}/items", self.base_url);
        let resp = get_with_retry(&self.retry, status, "Item names", || {
            self.http.get(&url).query(&[("ids", joined.as_str())])
        })?;

        // Entries that don't look like items are ignored rather than failing the batch.
        let raw: Vec<serde_json::Value> = resp.json().map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(raw
            .into_iter()
            .filter_map(|v| serde_json::from_value::<ItemInfo>(v).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_transaction() {
        let body = r#"[{"id": 2193823, "item_id": 19976, "price": 12345, "quantity": 10,
                        "created": "2025-06-01T10:00:00+00:00", "purchased": "2025-06-01T11:30:00+00:00"},
                       {"id": 2193824, "item_id": 24, "price": 50, "quantity": 1,
                        "created": "2025-06-02T10:00:00+00:00"}]"#;
        let txs: Vec<Transaction> = serde_json::from_str(body).unwrap();
        assert_eq!(txs[0].item_id, 19976);
        assert_eq!(txs[0].price, 12345);
        assert_eq!(txs[0].purchased.as_deref(), Some("2025-06-01T11:30:00+00:00"));
        assert_eq!(txs[1].purchased, None);
    }

    #[test]
    fn side_paths() {
        assert_eq!(Side::Buys.path(), "buys");
        assert_eq!(Side::Sells.path(), "sells");
    }
}
