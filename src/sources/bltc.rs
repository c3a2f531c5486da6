//! gw2bltc trading post search scraper.
//!
//! Reads the `table.table-result` rows of the search page, one item per
//! row, and follows `page=N` until a page comes back empty or the caller's
//! page limit is reached.

use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::http::{build_client, get_with_retry, RetryPolicy};
use super::SourceError;
use crate::jobs::StatusLog;
use crate::model::{ItemListing, MarketObservation};

const SITE: &str = "https://www.gw2bltc.com";
const SEARCH_PATH: &str = "/en/tp/search";

const MIN_COLUMNS: usize = 12;

/// Search filter sent as the query string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    pub profit_min: u32,
    pub profit_pct_min: u32,
    pub profit_pct_max: u32,
    pub sold_day_min: u32,
    pub bought_day_min: u32,
    pub items_per_page: u32,
    pub sort: String,
}

impl Default for SearchFilter {
    fn default() -> Self {
        SearchFilter {
            profit_min: 500,
            profit_pct_min: 10,
            profit_pct_max: 100,
            sold_day_min: 5,
            bought_day_min: 5,
            items_per_page: 200,
            sort: "profit-pct".to_string(),
        }
    }
}

impl SearchFilter {
    pub fn query(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("profit-min", self.profit_min.to_string()),
            ("profit-pct-min", self.profit_pct_min.to_string()),
            ("profit-pct-max", self.profit_pct_max.to_string()),
            ("sold-day-min", self.sold_day_min.to_string()),
            ("bought-day-min", self.bought_day_min.to_string()),
            ("ipg", self.items_per_page.to_string()),
            ("sort", self.sort.clone()),
            ("page", page.to_string()),
        ]
    }
}

pub struct BltcClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl BltcClient {
    pub fn new() -> Result<Self, SourceError> {
        Ok(Self {
            http: build_client(Duration::from_secs(20))?,
            base_url: SITE.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Points the client at another host, e.g. a mirror of the search pages.
    pub fn with_base_url(mut self, base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        self.base_url = base_url.into();
        self.retry = retry;
        self
    }

    pub fn fetch_page(&self, filter: &SearchFilter, page: u32, status: &StatusLog) -> Result<String, SourceError> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let query = filter.query(page);
        debug!(url = %url, page, "Fetching search page");

        let resp = get_with_retry(&self.retry, status, "Search page", || {
            self.http.get(&url).query(&query)
        })?;
        resp.text().map_err(SourceError::Http)
    }

    /// Scrapes search pages until an empty page, a failed request, or
    /// `max_pages` (0 = no limit). Rows gathered before a failure are kept.
    pub fn scrape(&self, filter: &SearchFilter, max_pages: u32, status: &StatusLog) -> Result<Vec<ItemListing>, SourceError> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            if max_pages > 0 && page > max_pages {
                break;
            }
            status.post(format!("Fetching page {page}..."));

            let html = match self.fetch_page(filter, page, status) {
                Ok(h) => h,
                Err(e) => {
                    warn!(page, error = %e, kept = all.len(), "Page failed, ending pagination");
                    status.post(format!("Request failed: {e}"));
                    break;
                }
            };

            if page == 1 {
                let hint = parse_total_pages(&html)?;
                info!(pages = hint, "Search result pagination");
            }

            let rows = parse_listings(&html)?;
            if rows.is_empty() {
                status.post("No more pages found.");
                break;
            }
            status.post(format!("Found {} items on page {page}", rows.len()));
            all.extend(rows);
            page += 1;
        }

        Ok(all)
    }
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|_| SourceError::Selector(css.to_string()))
}

pub fn parse_listings(html: &str) -> Result<Vec<ItemListing>, SourceError> {
    let doc = Html::parse_document(html);
    let row_sel = selector("table.table-result tr")?;
    let td_sel = selector("td")?;
    let link_sel = selector("a[href]")?;
    let span_sel = selector("span")?;

    let mut out = Vec::new();

    for row in doc.select(&row_sel).skip(1) {
        let cols: Vec<ElementRef> = row.select(&td_sel).collect();
        if cols.len() < MIN_COLUMNS {
            continue;
        }

        let name = cell_text(&cols[1]);
        let Some(href) = cols[1].select(&link_sel).next().and_then(|a| a.value().attr("href")) else {
            continue;
        };
        let link = format!("{SITE}{href}");
        let Some(item_id) = item_id_from_link(&link) else {
            continue;
        };

        let observation = MarketObservation {
            item_id,
            sell_price: parse_gold_silver(&cols[2], &span_sel),
            buy_price: parse_gold_silver(&cols[3], &span_sel),
            supply: parse_count(&cell_text(&cols[6])),
            demand: parse_count(&cell_text(&cols[7])),
            sold: parse_count(&cell_text(&cols[8])),
            offers: parse_count(&cell_text(&cols[9])),
            bought: parse_count(&cell_text(&cols[10])),
            bids: parse_count(&cell_text(&cols[11])),
        }
        .normalized();

        out.push(ItemListing { name, link, observation });
    }

    Ok(out)
}

/// Highest page number referenced by the pagination buttons; 1 when there are none.
pub fn parse_total_pages(html: &str) -> Result<u32, SourceError> {
    let doc = Html::parse_document(html);
    let btn_sel = selector(".btn-group.btn-group-justified a.btn")?;

    let mut max_page = 1;
    for btn in doc.select(&btn_sel) {
        if let Some(n) = btn.value().attr("href").and_then(page_from_href) {
            max_page = max_page.max(n);
        }
        if let Ok(n) = cell_text(&btn).parse::<u32>() {
            max_page = max_page.max(n);
        }
    }
    Ok(max_page)
}

fn page_from_href(href: &str) -> Option<u32> {
    let (_, rest) = href.split_once("page=")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// `https://www.gw2bltc.com/en/item/19976-Mystic-Coin` -> `19976`
pub fn item_id_from_link(link: &str) -> Option<String> {
    let last = link.trim_end_matches('/').rsplit('/').next()?;
    let id = last.split('-').next()?;
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

fn cell_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Gold (`cur-t1c`) and silver (`cur-t1b`) spans as decimal gold, rounded to the silver.
fn parse_gold_silver(cell: &ElementRef, span_sel: &Selector) -> f64 {
    let mut gold = 0u64;
    let mut silver = 0u64;
    for span in cell.select(span_sel) {
        let classes: Vec<&str> = span.value().classes().collect();
        if classes.contains(&"cur-t1c") {
            gold = parse_count(&cell_text(&span));
        } else if classes.contains(&"cur-t1b") {
            silver = parse_count(&cell_text(&span));
        }
    }
    ((gold as f64 + silver as f64 / 100.0) * 100.0).round() / 100.0
}

/// `"1,234"` -> 1234; anything unparseable is 0.
pub fn parse_count(txt: &str) -> u64 {
    txt.replace(',', "").trim().parse().unwrap_or(0)
}
