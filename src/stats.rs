use chrono::{DateTime, NaiveDate};
use statrs::statistics::{Data, Median, Statistics};
use std::collections::{BTreeMap, HashMap};

use crate::model::HistoricalSummary;
use crate::sources::datawars::HourlyRecord;

const COPPER_PER_GOLD: f64 = 10_000.0;

pub fn summarize(records: &[HourlyRecord]) -> HashMap<String, HistoricalSummary> {
    let mut map: HashMap<&str, Vec<&HourlyRecord>> = HashMap::new();

    for rec in records {
        map.entry(rec.item_id.as_str()).or_default().push(rec);
    }

    map.into_iter()
        .filter_map(|(id, mut recs)| {
            recs.sort_by(|a, b| a.date.cmp(&b.date));
            build_summary(id, &recs).map(|s| (id.to_string(), s))
        })
        .collect()
}

/// `None` when the item never had a buy or a sell price in the window.
fn build_summary(item_id: &str, recs: &[&HourlyRecord]) -> Option<HistoricalSummary> {
    let buy_total: f64 = recs.iter().map(|r| r.buy_price_max).sum();
    let sell_total: f64 = recs.iter().map(|r| r.sell_price_min).sum();
    if recs.is_empty() || buy_total == 0.0 || sell_total == 0.0 {
        return None;
    }

    let last = recs.last()?;

    let buy_prices: Vec<f64> = recs.iter().map(|r| r.buy_price_max).filter(|&p| p > 0.0).collect();
    let sell_prices: Vec<f64> = recs.iter().map(|r| r.sell_price_min).filter(|&p| p > 0.0).collect();

    let daily = daily_totals(recs);

    Some(HistoricalSummary {
        item_id: item_id.to_string(),
        samples: recs.len(),

        last_buy_price: last.buy_price_max / COPPER_PER_GOLD,
        last_sell_price: last.sell_price_min / COPPER_PER_GOLD,

        mean_demand: recs.iter().map(|r| r.buy_quantity).mean() as u64,
        mean_supply: recs.iter().map(|r| r.sell_quantity).mean() as u64,

        daily_bought: median_count(daily.values().map(|d| d.bought)),
        daily_sold: median_count(daily.values().map(|d| d.sold)),
        daily_bids: median_count(daily.values().map(|d| d.bids)),
        daily_offers: median_count(daily.values().map(|d| d.offers)),

        avg_buy_price: median(&buy_prices) / COPPER_PER_GOLD,
        avg_sell_price: median(&sell_prices) / COPPER_PER_GOLD,
        std_dev_buy_price: population_std_dev(&buy_prices) / COPPER_PER_GOLD,
        std_dev_sell_price: population_std_dev(&sell_prices) / COPPER_PER_GOLD,
    })
}

#[derive(Default)]
struct DayTotals {
    bought: f64,
    sold: f64,
    bids: f64,
    offers: f64,
}

// Records are bucketed by their UTC calendar day; undated records are left out.
// Days between the first and last record with no trades count as zero.
fn daily_totals(recs: &[&HourlyRecord]) -> BTreeMap<NaiveDate, DayTotals> {
    let mut days: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();
    for r in recs {
        let Ok(ts) = DateTime::parse_from_rfc3339(&r.date) else {
            continue;
        };
        let day = days.entry(ts.naive_utc().date()).or_default();
        day.bought += r.buy_sold;
        day.sold += r.sell_sold;
        day.bids += r.buy_listed;
        day.offers += r.sell_listed;
    }

    let span = days.keys().next().copied().zip(days.keys().next_back().copied());
    if let Some((first, last)) = span {
        for day in first.iter_days().take_while(|d| *d <= last) {
            days.entry(day).or_default();
        }
    }
    days
}

fn median_count(values: impl Iterator<Item = f64>) -> u64 {
    let v: Vec<f64> = values.collect();
    let m = median(&v);
    if m.is_finite() && m > 0.0 { m as u64 } else { 0 }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Data::new(values.to_vec()).median()
}

fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().population_std_dev()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rec(id: &str, date: &str, buy: f64, sell: f64, sold: f64, listed: f64) -> HourlyRecord {
        HourlyRecord {
            item_id: id.into(),
            date: date.into(),
            buy_price_max: buy,
            sell_price_min: sell,
            buy_listed: listed,
            buy_sold: sold,
            sell_listed: listed * 2.0,
            sell_sold: sold * 2.0,
            buy_quantity: 100.0,
            sell_quantity: 300.0,
        }
    }

    #[test]
    fn summarizes_per_item() {
        let records = vec![
            rec("1", "2025-06-01T00:00:00.000Z", 10_000.0, 20_000.0, 5.0, 10.0),
            rec("1", "2025-06-01T12:00:00.000Z", 12_000.0, 22_000.0, 5.0, 10.0),
            rec("1", "2025-06-02T00:00:00.000Z", 0.0, 24_000.0, 2.0, 4.0),
            rec("1", "2025-06-03T00:00:00.000Z", 14_000.0, 26_000.0, 30.0, 40.0),
        ];
        let out = summarize(&records);
        let s = &out["1"];

        assert_eq!(s.samples, 4);
        assert_relative_eq!(s.last_buy_price, 1.4, epsilon = 1e-12);
        assert_relative_eq!(s.last_sell_price, 2.6, epsilon = 1e-12);
        assert_eq!(s.mean_demand, 100);
        assert_eq!(s.mean_supply, 300);

        // daily bought: [10, 2, 30] -> median 10
        assert_eq!(s.daily_bought, 10);
        // daily sold: [20, 4, 60] -> 20
        assert_eq!(s.daily_sold, 20);
        // daily bids: [20, 4, 40] -> 20; offers doubled
        assert_eq!(s.daily_bids, 20);
        assert_eq!(s.daily_offers, 40);

        // zero buy price is excluded from the price stats
        assert_relative_eq!(s.avg_buy_price, 1.2, epsilon = 1e-12);
        assert_relative_eq!(s.avg_sell_price, 2.3, epsilon = 1e-12);
        let sd = (8_000_000.0_f64 / 3.0).sqrt() / 10_000.0;
        assert_relative_eq!(s.std_dev_buy_price, sd, epsilon = 1e-9);
    }

    #[test]
    fn items_without_prices_are_dropped() {
        let records = vec![
            rec("2", "2025-06-01T00:00:00.000Z", 0.0, 5_000.0, 1.0, 1.0),
            rec("3", "2025-06-01T00:00:00.000Z", 100.0, 0.0, 1.0, 1.0),
        ];
        assert!(summarize(&records).is_empty());
    }

    #[test]
    fn records_are_ordered_by_date_before_taking_last() {
        let records = vec![
            rec("4", "2025-06-02T00:00:00.000Z", 30_000.0, 40_000.0, 1.0, 1.0),
            rec("4", "2025-06-01T00:00:00.000Z", 10_000.0, 20_000.0, 1.0, 1.0),
        ];
        let s = &summarize(&records)["4"];
        assert_relative_eq!(s.last_buy_price, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn gap_days_count_as_zero() {
        let records = vec![
            rec("5", "2025-06-01T00:00:00.000Z", 10_000.0, 20_000.0, 8.0, 10.0),
            rec("5", "2025-06-04T00:00:00.000Z", 10_000.0, 20_000.0, 6.0, 10.0),
            rec("5", "2025-06-05T00:00:00.000Z", 10_000.0, 20_000.0, 4.0, 10.0),
        ];
        let s = &summarize(&records)["5"];
        // daily bought: [8, 0, 0, 6, 4] -> median 4
        assert_eq!(s.daily_bought, 4);
        // daily bids: [10, 0, 0, 10, 10] -> 10
        assert_eq!(s.daily_bids, 10);
    }

    #[test]
    fn empty_input() {
        assert!(summarize(&[]).is_empty());
        assert_eq!(median(&[]), 0.0);
        assert_eq!(population_std_dev(&[]), 0.0);
    }
}
