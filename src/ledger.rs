use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::model::ProfitRow;
use crate::sources::gw2::Transaction;

/// Copper to decimal gold, dropping copper: 1g 23s 45c -> 1.23.
pub fn coins_to_gold(coins: u64) -> f64 {
    let gold = coins / 10_000;
    let silver = (coins % 10_000) / 100;
    gold as f64 + silver as f64 / 100.0
}

fn transaction_time(tx: &Transaction) -> Option<DateTime<Utc>> {
    let raw = tx.purchased.as_deref().or(tx.created.as_deref())?;
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}

/// Keeps transactions completed within `days` of `now`. Returns the kept
/// list and how many were skipped for a missing or unreadable date.
pub fn filter_recent(txs: Vec<Transaction>, days: u32, now: DateTime<Utc>) -> (Vec<Transaction>, usize) {
    let cutoff = now - Duration::days(i64::from(days));
    let mut skipped = 0;

    let kept = txs
        .into_iter()
        .filter(|tx| match transaction_time(tx) {
            Some(t) => t >= cutoff,
            None => {
                skipped += 1;
                false
            }
        })
        .collect();

    (kept, skipped)
}

#[derive(Default)]
struct Totals {
    bought_qty: u64,
    spent: f64,
    sold_qty: u64,
    received: f64,
}

/// Per-item profit over the window. Only items that were bought appear;
/// sales of items not bought in the window are ignored. Sale proceeds are
/// taken net of `fee`.
pub fn aggregate(
    buys: &[Transaction],
    sells: &[Transaction],
    names: &HashMap<u32, String>,
    fee: f64,
) -> Vec<ProfitRow> {
    let mut agg: HashMap<u32, Totals> = HashMap::new();

    for tx in buys {
        let t = agg.entry(tx.item_id).or_default();
        t.bought_qty += tx.quantity;
        t.spent += coins_to_gold(tx.price) * tx.quantity as f64;
    }

    for tx in sells {
        if let Some(t) = agg.get_mut(&tx.item_id) {
            t.sold_qty += tx.quantity;
            t.received += coins_to_gold(tx.price) * tx.quantity as f64 * fee;
        }
    }

    let mut rows: Vec<ProfitRow> = agg
        .into_iter()
        .filter(|(_, t)| t.bought_qty > 0)
        .map(|(id, t)| {
            let profit = t.received - t.spent;
            ProfitRow {
                item_id: id,
                name: names.get(&id).cloned().unwrap_or_else(|| format!("Item {id}")),
                bought_qty: t.bought_qty,
                sold_qty: t.sold_qty,
                spent: t.spent,
                received: t.received,
                profit,
                roi: (t.spent > 0.0).then(|| profit / t.spent),
            }
        })
        .collect();

    rows.sort_by(|a, b| b.profit.total_cmp(&a.profit).then(a.item_id.cmp(&b.item_id)));
    rows
}
