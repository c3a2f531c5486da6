//! Long-running scans. Each runs on its own thread and reports progress
//! lines through a [`StatusLog`] that the GUI drains every frame.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::info;

use crate::config::AppConfig;
use crate::ledger;
use crate::metrics::compute_batch;
use crate::model::{HistoricalSummary, ItemListing, ProfitRow, TrackedOrder};
use crate::report::{self, FlipRow};
use crate::sources::bltc::BltcClient;
use crate::sources::datawars::DataWarsClient;
use crate::sources::gw2::{Gw2Client, Side};
use crate::store::{Store, DB_FILE};

pub const SCRAPE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Progress sink. Every line is traced; when a receiver is attached it is
/// forwarded there as well.
#[derive(Debug, Clone, Default)]
pub struct StatusLog {
    tx: Option<Sender<String>>,
}

impl StatusLog {
    pub fn silent() -> Self {
        StatusLog { tx: None }
    }

    pub fn channel() -> (Self, Receiver<String>) {
        let (tx, rx) = channel();
        (StatusLog { tx: Some(tx) }, rx)
    }

    pub fn post(&self, msg: impl Into<String>) {
        let msg = msg.into();
        info!(target: "gw2_analyzer::status", "{msg}");
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is watching any more.
            let _ = tx.send(msg);
        }
    }
}

pub struct Job<T> {
    handle: JoinHandle<Result<T>>,
    log: Receiver<String>,
}

impl<T: Send + 'static> Job<T> {
    pub fn spawn<F>(name: &str, work: F) -> Result<Self>
    where
        F: FnOnce(&StatusLog) -> Result<T> + Send + 'static,
    {
        let (status, log) = StatusLog::channel();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || work(&status))
            .with_context(|| format!("Failed to start {name}"))?;
        Ok(Job { handle, log })
    }

    pub fn drain_log(&self) -> Vec<String> {
        self.log.try_iter().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<T> {
        self.handle
            .join()
            .map_err(|_| anyhow!("background job panicked"))?
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlipScan {
    pub scraped_at: String,
    pub rows: Vec<FlipRow>,
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfitScan {
    pub days: u32,
    pub rows: Vec<ProfitRow>,
    pub csv: Option<PathBuf>,
    pub html: Option<PathBuf>,
}

pub fn open_store(cfg: &AppConfig) -> Result<Store> {
    fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("Failed to create {}", cfg.output_dir.display()))?;
    let path = cfg.output_dir.join(DB_FILE);
    Store::open(&path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Pairs listings with history and tracked orders, runs the engine over the
/// batch, and appends rows for tracked items that are missing from `listings`.
fn build_rows(
    cfg: &AppConfig,
    store: &Store,
    listings: Vec<(ItemListing, String)>,
    history: &HashMap<String, HistoricalSummary>,
) -> Result<Vec<FlipRow>> {
    let mut orders: HashMap<String, TrackedOrder> = store
        .load_orders()
        .context("Failed to load tracked orders")?
        .into_iter()
        .map(|o| (o.item_id.clone(), o))
        .collect();

    let mut entries = listings;
    let mut missing: Vec<&String> = orders
        .keys()
        .filter(|id| !entries.iter().any(|(l, _)| &l.observation.item_id == *id))
        .collect();
    missing.sort();
    for id in missing {
        if let Some(entry) = store.latest_listing(id)? {
            entries.push(entry);
        }
    }

    for (listing, _) in entries.iter_mut() {
        if !cfg.use_history_counts {
            continue;
        }
        if let Some(h) = history.get(&listing.observation.item_id) {
            listing.observation = h.observation();
        }
    }

    let observations: Vec<_> = entries.iter().map(|(l, _)| l.observation.clone()).collect();
    let metrics = compute_batch(&observations, &cfg.parameters);

    Ok(entries
        .into_iter()
        .zip(metrics)
        .map(|((listing, scraped_at), metrics)| {
            let id = &listing.observation.item_id;
            FlipRow {
                history: history.get(id).cloned(),
                order: orders.remove(id),
                listing,
                scraped_at,
                metrics,
            }
        })
        .collect())
}

/// Scrape, store, enrich, compute and write the flip report.
pub fn run_flip_scan(cfg: &AppConfig, status: &StatusLog) -> Result<FlipScan> {
    let scraper = BltcClient::new()?;
    let listings = scraper.scrape(&cfg.search, cfg.max_pages, status)?;
    if listings.is_empty() {
        status.post("No data scraped.");
        return Ok(FlipScan::default());
    }
    status.post(format!("Successfully scraped {} total items.", listings.len()));

    let scraped_at = Utc::now().format(SCRAPE_TIME_FORMAT).to_string();
    let mut store = open_store(cfg)?;
    store
        .save_scrape(&listings, &scraped_at)
        .context("Failed to save scrape")?;

    let history = if cfg.historical {
        let ids: Vec<String> = listings.iter().map(|l| l.observation.item_id.clone()).collect();
        let client = DataWarsClient::new()?;
        let h = client.summaries(&ids, cfg.history_days, status);
        status.post(format!("Historical data for {} of {} items.", h.len(), ids.len()));
        h
    } else {
        HashMap::new()
    };

    status.post("Scraping complete. Processing data...");
    let entries = listings.into_iter().map(|l| (l, scraped_at.clone())).collect();
    let rows = build_rows(cfg, &store, entries, &history)?;

    let path = cfg.output_dir.join(report::FLIP_REPORT);
    let written = report::write_flip_report(&path, &rows, &cfg.parameters)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    status.post(format!("Data saved to {} ({written} rows).", path.display()));

    Ok(FlipScan {
        scraped_at,
        rows,
        report: Some(path),
    })
}

/// Most recent stored scrape, recomputed with the current parameters.
pub fn load_saved_scan(cfg: &AppConfig) -> Result<FlipScan> {
    let store = open_store(cfg)?;
    let listings = store.load_latest_scrape().context("Failed to load last scrape")?;
    let scraped_at = listings.first().map(|(_, at)| at.clone()).unwrap_or_default();
    let rows = build_rows(cfg, &store, listings, &HashMap::new())?;
    Ok(FlipScan { scraped_at, rows, report: None })
}

/// Pull account history, aggregate per item and write the CSV and HTML reports.
pub fn run_profit_report(cfg: &AppConfig, status: &StatusLog) -> Result<ProfitScan> {
    if cfg.api_key.trim().is_empty() {
        bail!("API key is missing");
    }
    let days = cfg.transaction_days;
    fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("Failed to create {}", cfg.output_dir.display()))?;

    let client = Gw2Client::new(cfg.api_key.trim())?;
    let now = Utc::now();

    let (buys, skipped_buys) = ledger::filter_recent(client.transactions(Side::Buys, status), days, now);
    let (sells, skipped_sells) = ledger::filter_recent(client.transactions(Side::Sells, status), days, now);
    if skipped_buys + skipped_sells > 0 {
        status.post(format!("Skipped {} transactions with unreadable dates.", skipped_buys + skipped_sells));
    }

    if buys.is_empty() {
        status.post(format!("No buy transactions found in the last {days} days."));
        return Ok(ProfitScan { days, ..Default::default() });
    }

    status.post("Fetching item names...");
    let ids: Vec<u32> = buys.iter().chain(&sells).map(|t| t.item_id).collect();
    let names = client.item_names(&ids, status);

    status.post("Aggregating transactions...");
    let rows = ledger::aggregate(&buys, &sells, &names, cfg.parameters.trading_post_fee);

    let csv = cfg.output_dir.join(report::PROFIT_REPORT);
    report::write_profit_report(&csv, &rows)
        .with_context(|| format!("Failed to write {}", csv.display()))?;
    status.post(format!("Profit report saved to {}", csv.display()));

    let html = cfg.output_dir.join(report::HTML_REPORT);
    report::write_html_report(&html, &rows, days)
        .with_context(|| format!("Failed to write {}", html.display()))?;
    status.post("Transaction report complete.");

    Ok(ProfitScan {
        days,
        rows,
        csv: Some(csv),
        html: Some(html),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MarketObservation;

    fn listing(id: &str, buy: f64, sell: f64) -> ItemListing {
        ItemListing {
            name: format!("Item {id}"),
            link: format!("https://www.gw2bltc.com/en/item/{id}"),
            observation: MarketObservation {
                item_id: id.into(),
                buy_price: buy,
                sell_price: sell,
                supply: 100,
                demand: 120,
                bought: 40,
                sold: 50,
                bids: 60,
                offers: 70,
            },
        }
    }

    fn cfg_in(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn status_log_forwards_lines() {
        let (status, rx) = StatusLog::channel();
        status.post("one");
        status.post(String::from("two"));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), ["one", "two"]);

        StatusLog::silent().post("nobody listening");
        drop(rx);
        status.post("receiver gone");
    }

    #[test]
    fn job_runs_and_collects_log() {
        let job = Job::spawn("test-job", |status| {
            status.post("working");
            Ok(42)
        })
        .unwrap();
        while !job.is_finished() {
            thread::yield_now();
        }
        assert_eq!(job.drain_log(), ["working"]);
        assert_eq!(job.join().unwrap(), 42);
    }

    #[test]
    fn job_errors_propagate() {
        let job: Job<()> = Job::spawn("failing", |_| bail!("boom")).unwrap();
        let err = job.join().unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn saved_scan_carries_tracked_orders() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_in(dir.path());
        {
            let mut store = open_store(&cfg).unwrap();
            store.save_scrape(&[listing("9", 0.5, 0.9)], "2025-06-01 10:00:00").unwrap();
            store.save_scrape(&[listing("1", 1.0, 2.0), listing("2", 2.0, 3.0)], "2025-06-02 10:00:00").unwrap();
            for id in ["2", "9"] {
                store
                    .upsert_order(&TrackedOrder { item_id: id.into(), qty_ordered: 3, buy_price: 1.0, ..Default::default() })
                    .unwrap();
            }
        }

        let scan = load_saved_scan(&cfg).unwrap();
        assert_eq!(scan.scraped_at, "2025-06-02 10:00:00");
        let ids: Vec<&str> = scan.rows.iter().map(|r| r.listing.observation.item_id.as_str()).collect();
        // item 9 is only in the older scrape but still tracked
        assert_eq!(ids, ["1", "2", "9"]);
        assert!(scan.rows[0].order.is_none());
        assert_eq!(scan.rows[1].order.as_ref().map(|o| o.qty_ordered), Some(3));
        assert_eq!(scan.rows[2].scraped_at, "2025-06-01 10:00:00");
    }

    #[test]
    fn history_counts_replace_scraped_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = cfg_in(dir.path());
        cfg.use_history_counts = true;
        let store = open_store(&cfg).unwrap();

        let summary = HistoricalSummary {
            item_id: "1".into(),
            last_buy_price: 4.0,
            last_sell_price: 6.0,
            daily_bought: 7,
            daily_sold: 8,
            daily_bids: 9,
            daily_offers: 10,
            ..Default::default()
        };
        let history = HashMap::from([("1".to_string(), summary)]);
        let entries = vec![
            (listing("1", 1.0, 2.0), "t".to_string()),
            (listing("2", 1.0, 2.0), "t".to_string()),
        ];

        let rows = build_rows(&cfg, &store, entries, &history).unwrap();
        assert_eq!(rows[0].listing.observation.bought, 7);
        assert_eq!(rows[0].listing.observation.buy_price, 4.0);
        assert!(rows[0].history.is_some());
        assert_eq!(rows[1].listing.observation.bought, 40);
        assert!(rows[1].history.is_none());
    }

    #[test]
    fn profit_report_requires_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_in(dir.path());
        let err = run_profit_report(&cfg, &StatusLog::silent()).unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
