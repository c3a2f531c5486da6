use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::metrics::fill_probability;
use crate::model::{HistoricalSummary, ItemListing, Parameters, ProfitRow, ProfitabilityMetrics, TrackedOrder};

pub const FLIP_REPORT: &str = "scraper-results.csv";
pub const PROFIT_REPORT: &str = "profit-report.csv";
pub const HTML_REPORT: &str = "interactive_report.html";

const TOP_N: usize = 10;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

/// One line of the flip report.
#[derive(Debug, Clone, PartialEq)]
pub struct FlipRow {
    pub listing: ItemListing,
    pub scraped_at: String,
    pub history: Option<HistoricalSummary>,
    pub metrics: ProfitabilityMetrics,
    pub order: Option<TrackedOrder>,
}

impl FlipRow {
    /// Worth placing an order: the target price is reachable at the current
    /// bid and buying there returns something.
    pub fn actionable(&self) -> bool {
        let m = &self.metrics;
        !m.target_price_above_market
            && m.theoretical_return_for_target_roi.is_some_and(|r| r > 0.0)
    }

    pub fn is_tracked(&self) -> bool {
        self.order.is_some()
    }
}

const FLIP_HEADER: &[&str] = &[
    "Item Name", "Item Link", "Date of Scrape", "Buy Price (Inst.)", "Sell Price (Inst.)",
    "Demand", "Supply", "Bought", "Sold", "Bids", "Offers",
    "Avg Buy Price (7d)", "Avg Sell Price (7d)", "Std Dev Buy Price (7d)", "Std Dev Sell Price (7d)",
    "Overcut (%)", "Undercut (%)", "Overcut (g)", "Undercut (g)",
    "Amount Received", "Theoretical Profit", "Demand-Supply Gap (%)",
    "Max Flips / Day", "Bought/Bids", "Sold/Offers",
    "Buy-Through Rate (%)", "Sell-Through Rate (%)", "Flip-Through Rate (%)",
    "E(Profit | Qty = 1)", "E(ROI | Qty = 1)", "P(Buy = Qty)", "P(Sell = Qty)",
    "Optimal Qty", "Dynamic Sell-Through Rate (%)", "E(Sales | Q = Optimal Q)",
    "E(Profit | Q = Optimal Q)", "Optimal Investment (g)", "E(ROI | Q = Optimal Q)", "Time to Sell (Q Optimal)",
    "Target ROI", "Optimal Buy Price | Target ROI", "Optimal Qty | Target ROI", "Return | Target ROI",
    "Actual Qty Ordered", "Actual Buy Price", "Actual Sell Price",
    "Buy Order Placed", "Sell Order Placed", "Sold (manual)",
];

fn price(v: f64) -> String {
    format!("{v:.2}")
}

fn pct(v: f64) -> String {
    format!("{:.0}%", v * 100.0)
}

fn opt(v: Option<f64>, f: fn(f64) -> String) -> String {
    v.map(f).unwrap_or_default()
}

fn opt_qty(v: Option<u64>) -> String {
    v.map(|q| q.to_string()).unwrap_or_default()
}

fn flag(b: bool) -> String {
    if b { "TRUE".into() } else { "FALSE".into() }
}

/// Tracked rows keep their relative order and come first; the rest follow by unit profit, best first.
pub fn report_order(rows: &[FlipRow]) -> Vec<&FlipRow> {
    let (mut tracked, mut fresh): (Vec<&FlipRow>, Vec<&FlipRow>) =
        rows.iter().partition(|r| r.is_tracked());
    fresh.sort_by(|a, b| b.metrics.unit_profit.total_cmp(&a.metrics.unit_profit));
    tracked.append(&mut fresh);
    tracked
}

fn flip_record(r: &FlipRow, params: &Parameters) -> Vec<String> {
    let o = &r.listing.observation;
    let m = &r.metrics;
    let h = r.history.as_ref();
    let order = r.order.as_ref();

    vec![
        r.listing.name.clone(),
        r.listing.link.clone(),
        r.scraped_at.clone(),
        price(o.buy_price),
        price(o.sell_price),
        o.demand.to_string(),
        o.supply.to_string(),
        o.bought.to_string(),
        o.sold.to_string(),
        o.bids.to_string(),
        o.offers.to_string(),
        opt(h.map(|h| h.avg_buy_price), price),
        opt(h.map(|h| h.avg_sell_price), price),
        h.map(|h| format!("{:.4}", h.std_dev_buy_price)).unwrap_or_default(),
        h.map(|h| format!("{:.4}", h.std_dev_sell_price)).unwrap_or_default(),
        pct(params.overcut_pct),
        pct(params.undercut_pct),
        price(m.overcut_price),
        price(m.undercut_price),
        price(m.amount_received),
        price(m.unit_profit),
        opt(m.demand_supply_gap, pct),
        m.max_flips_per_day.to_string(),
        opt(m.bought_per_bid, price),
        opt(m.sold_per_offer, price),
        pct(m.buy_through_rate),
        pct(m.sell_through_rate),
        pct(m.flip_through_rate),
        price(m.expected_profit_single),
        opt(m.expected_roi_single, pct),
        opt(order.and_then(|t| fill_probability(t.qty_ordered, m.buy_through_rate)), price),
        opt(order.and_then(|t| fill_probability(t.qty_ordered, m.sell_through_rate)), price),
        opt_qty(m.optimal_quantity),
        opt(m.dynamic_sell_through, pct),
        opt(m.expected_sales_at_optimal, price),
        opt(m.expected_profit_at_optimal, price),
        opt(m.optimal_investment, price),
        opt(m.expected_roi_at_optimal, pct),
        opt(m.time_to_sell, price),
        pct(m.target_roi),
        price(m.optimal_buy_price_for_target_roi),
        opt_qty(m.optimal_quantity_for_target_roi),
        opt(m.theoretical_return_for_target_roi, price),
        order.map(|t| t.qty_ordered.to_string()).unwrap_or_default(),
        opt(order.map(|t| t.buy_price), price),
        opt(order.and_then(|t| t.sell_price), price),
        flag(order.is_some_and(|t| t.buy_placed)),
        flag(order.is_some_and(|t| t.sell_placed)),
        flag(order.is_some_and(|t| t.sold)),
    ]
}

pub fn write_flip_report(path: &Path, rows: &[FlipRow], params: &Parameters) -> Result<usize, ReportError> {
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(FLIP_HEADER)?;

    let ordered = report_order(rows);
    for r in &ordered {
        w.write_record(flip_record(r, params))?;
    }
    w.flush()?;
    Ok(ordered.len())
}

pub fn write_profit_report(path: &Path, rows: &[ProfitRow]) -> Result<usize, ReportError> {
    let mut w = csv::Writer::from_path(path)?;
    w.write_record([
        "Item Name", "Bought Qty", "Sold Qty", "Total Spent (g.s)",
        "Total Received (g.s)", "ROI (g.s)", "ROI (%)",
    ])?;

    let mut sorted: Vec<&ProfitRow> = rows.iter().collect();
    sorted.sort_by(|a, b| b.profit.total_cmp(&a.profit));

    for r in &sorted {
        w.write_record([
            r.name.clone(),
            r.bought_qty.to_string(),
            r.sold_qty.to_string(),
            price(r.spent),
            price(r.received),
            price(r.profit),
            opt(r.roi, pct),
        ])?;
    }
    w.flush()?;
    Ok(sorted.len())
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn bar_table(out: &mut String, title: &str, rows: &[(&str, f64)], fmt: fn(f64) -> String) {
    let max = rows.iter().map(|(_, v)| v.abs()).fold(0.0, f64::max);

    let _ = writeln!(out, "<h2>{}</h2>", escape(title));
    if rows.is_empty() {
        out.push_str("<p class=\"empty\">Nothing to show.</p>\n");
        return;
    }
    out.push_str("<table>\n<tr><th>Item</th><th>Value</th><th></th></tr>\n");
    for (name, v) in rows {
        let width = if max > 0.0 { v.abs() / max * 100.0 } else { 0.0 };
        let class = if *v < 0.0 { "bar neg" } else { "bar" };
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td><div class=\"{class}\" style=\"width:{width:.1}%\"></div></td></tr>",
            escape(name),
            fmt(*v),
        );
    }
    out.push_str("</table>\n");
}

/// Static page with the best items by profit and by ROI.
pub fn render_html_report(rows: &[ProfitRow], days: u32) -> String {
    let mut by_profit: Vec<&ProfitRow> = rows.iter().filter(|r| r.profit > 0.0).collect();
    by_profit.sort_by(|a, b| b.profit.total_cmp(&a.profit));
    let by_profit: Vec<(&str, f64)> =
        by_profit.iter().take(TOP_N).map(|r| (r.name.as_str(), r.profit)).collect();

    let mut by_roi: Vec<(&str, f64)> = rows
        .iter()
        .filter_map(|r| r.roi.map(|roi| (r.name.as_str(), roi)))
        .collect();
    by_roi.sort_by(|a, b| b.1.total_cmp(&a.1));
    by_roi.truncate(TOP_N);

    let total_spent: f64 = rows.iter().map(|r| r.spent).sum();
    let total_profit: f64 = rows.iter().map(|r| r.profit).sum();

    let mut out = String::new();
    out.push_str(concat!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>GW2 Profit Report</title>\n",
        "<style>body{font-family:sans-serif;background:#1a1510;color:#e8dcc0;margin:2em}",
        "table{border-collapse:collapse;margin-bottom:2em}td,th{padding:4px 10px;text-align:left}",
        "tr:nth-child(even){background:#2a2218}.bar{height:12px;background:#d4a640;min-width:1px}",
        ".bar.neg{background:#c05050}.empty{color:#888}</style>\n</head><body>\n",
    ));
    let _ = writeln!(out, "<h1>Trading post profit, last {days} days</h1>");
    let _ = writeln!(
        out,
        "<p>{} items, {} gold spent, {} gold profit</p>",
        rows.len(),
        price(total_spent),
        price(total_profit)
    );
    bar_table(&mut out, "Top 10 by profit (g)", &by_profit, price);
    bar_table(&mut out, "Top 10 by ROI", &by_roi, pct);
    out.push_str("</body></html>\n");
    out
}

pub fn write_html_report(path: &Path, rows: &[ProfitRow], days: u32) -> Result<(), ReportError> {
    fs::write(path, render_html_report(rows, days))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::compute_metrics;
    use crate::model::MarketObservation;

    fn row(id: &str, buy: f64, sell: f64, order: Option<TrackedOrder>) -> FlipRow {
        let observation = MarketObservation {
            item_id: id.into(),
            buy_price: buy,
            sell_price: sell,
            supply: 0,
            demand: 5,
            bought: 10,
            sold: 10,
            bids: 20,
            offers: 10,
        };
        let metrics = compute_metrics(&observation, &Parameters::default());
        FlipRow {
            listing: ItemListing {
                name: format!("Item {id}"),
                link: format!("https://www.gw2bltc.com/en/item/{id}"),
                observation,
            },
            scraped_at: "2025-06-01 10:00:00".into(),
            history: None,
            metrics,
            order,
        }
    }

    fn profit_row(name: &str, spent: f64, profit: f64) -> ProfitRow {
        ProfitRow {
            item_id: 1,
            name: name.into(),
            bought_qty: 1,
            sold_qty: 1,
            spent,
            received: spent + profit,
            profit,
            roi: (spent > 0.0).then(|| profit / spent),
        }
    }

    fn read_back(path: &Path) -> (csv::StringRecord, Vec<csv::StringRecord>) {
        let mut r = csv::Reader::from_path(path).unwrap();
        let header = r.headers().unwrap().clone();
        let records = r.records().map(|x| x.unwrap()).collect();
        (header, records)
    }

    #[test]
    fn tracked_rows_first_then_by_unit_profit() {
        let tracked = TrackedOrder { item_id: "3".into(), qty_ordered: 2, buy_price: 1.0, ..Default::default() };
        let rows = vec![
            row("1", 1.0, 2.0, None),
            row("2", 1.0, 9.0, None),
            row("3", 1.0, 1.0, Some(tracked)),
        ];
        let ids: Vec<&str> = report_order(&rows)
            .iter()
            .map(|r| r.listing.observation.item_id.as_str())
            .collect();
        assert_eq!(ids, ["3", "2", "1"]);
    }

    #[test]
    fn flip_report_columns_and_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FLIP_REPORT);
        let order = TrackedOrder {
            item_id: "7".into(),
            qty_ordered: 2,
            buy_price: 1.5,
            sell_price: None,
            buy_placed: true,
            ..Default::default()
        };
        let rows = vec![row("7", 1.0, 2.0, Some(order)), row("8", 0.0, 0.0, None)];

        let n = write_flip_report(&path, &rows, &Parameters::default()).unwrap();
        assert_eq!(n, 2);

        let (header, records) = read_back(&path);
        assert_eq!(header.len(), FLIP_HEADER.len());
        let col = |name: &str| header.iter().position(|h| h == name).unwrap();

        let tracked = &records[0];
        assert_eq!(&tracked[col("Item Name")], "Item 7");
        assert_eq!(&tracked[col("Buy Price (Inst.)")], "1.00");
        assert_eq!(&tracked[col("Overcut (%)")], "110%");
        assert_eq!(&tracked[col("Buy-Through Rate (%)")], "50%");
        // supply is zero
        assert_eq!(&tracked[col("Demand-Supply Gap (%)")], "");
        // 0.5^2
        assert_eq!(&tracked[col("P(Buy = Qty)")], "0.25");
        assert_eq!(&tracked[col("P(Sell = Qty)")], "1.00");
        assert_eq!(&tracked[col("Actual Qty Ordered")], "2");
        assert_eq!(&tracked[col("Actual Sell Price")], "");
        assert_eq!(&tracked[col("Buy Order Placed")], "TRUE");
        assert_eq!(&tracked[col("Sold (manual)")], "FALSE");
        assert_eq!(&tracked[col("Avg Buy Price (7d)")], "");

        let untracked = &records[1];
        assert_eq!(&untracked[col("Optimal Qty")], "");
        assert_eq!(&untracked[col("P(Buy = Qty)")], "");
        assert_eq!(&untracked[col("Actual Qty Ordered")], "");
    }

    #[test]
    fn actionable_needs_reachable_positive_return() {
        let cheap_bid = row("1", 0.1, 20.0, None);
        assert!(cheap_bid.metrics.target_price_above_market);
        assert!(!cheap_bid.actionable());

        let pricey_bid = row("2", 30.0, 20.0, None);
        assert!(!pricey_bid.metrics.target_price_above_market);
        assert_eq!(
            pricey_bid.actionable(),
            pricey_bid.metrics.theoretical_return_for_target_roi.is_some_and(|r| r > 0.0)
        );
    }

    #[test]
    fn profit_report_sorted_with_blank_roi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROFIT_REPORT);
        let rows = vec![profit_row("Low", 10.0, -2.0), profit_row("Free", 0.0, 1.0), profit_row("High", 10.0, 5.0)];

        write_profit_report(&path, &rows).unwrap();
        let (_, records) = read_back(&path);
        let names: Vec<&str> = records.iter().map(|r| &r[0]).collect();
        assert_eq!(names, ["High", "Free", "Low"]);
        assert_eq!(&records[0][6], "50%");
        assert_eq!(&records[1][6], "");
        assert_eq!(&records[2][5], "-2.00");
    }

    #[test]
    fn html_report_escapes_and_limits() {
        let mut rows: Vec<ProfitRow> = (0..15).map(|i| profit_row(&format!("Item {i}"), 10.0, i as f64 + 1.0)).collect();
        rows.push(profit_row("<Bad & Name>", 1.0, 100.0));

        let html = render_html_report(&rows, 30);
        assert!(html.contains("last 30 days"));
        assert!(html.contains("&lt;Bad &amp; Name&gt;"));
        assert!(!html.contains("<Bad"));
        assert!(html.contains("width:100.0%"));
        // 10 rows per table plus the header row
        assert_eq!(html.matches("<tr>").count(), 2 * (TOP_N + 1));
    }

    #[test]
    fn html_report_with_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HTML_REPORT);
        write_html_report(&path, &[], 7).unwrap();
        let html = fs::read_to_string(&path).unwrap();
        assert_eq!(html.matches("Nothing to show.").count(), 2);
    }
}
