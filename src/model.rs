use serde::{Deserialize, Serialize};

/// Fixed trading post cut: sellers receive 85% of the listing price.
pub const TRADING_POST_FEE: f64 = 0.85;

pub const OVERCUT_PCT_DEFAULT: f64 = 1.10;
pub const UNDERCUT_PCT_DEFAULT: f64 = 0.90;
pub const TARGET_ROI_DEFAULT: f64 = 0.10;

/// One market snapshot for a single item. Prices are in gold (gold + silver / 100).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketObservation {
    pub item_id: String,

    pub buy_price: f64,
    pub sell_price: f64,

    pub supply: u64,
    pub demand: u64,

    pub bought: u64,
    pub sold: u64,
    pub bids: u64,
    pub offers: u64,
}

impl MarketObservation {
    /// Replaces NaN, infinite and negative prices with zero.
    pub fn normalized(mut self) -> Self {
        self.buy_price = clean_price(self.buy_price);
        self.sell_price = clean_price(self.sell_price);
        self
    }
}

fn clean_price(p: f64) -> f64 {
    if p.is_finite() && p > 0.0 { p } else { 0.0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub overcut_pct: f64,
    pub undercut_pct: f64,
    pub target_roi: f64,

    #[serde(skip, default = "fixed_fee")]
    pub trading_post_fee: f64,
}

fn fixed_fee() -> f64 {
    TRADING_POST_FEE
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            overcut_pct: OVERCUT_PCT_DEFAULT,
            undercut_pct: UNDERCUT_PCT_DEFAULT,
            target_roi: TARGET_ROI_DEFAULT,
            trading_post_fee: TRADING_POST_FEE,
        }
    }
}

/// A scraped search result row: the observation plus what a report needs to display it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemListing {
    pub name: String,
    pub link: String,
    pub observation: MarketObservation,
}

/// Derived decision fields for one observation. `None` means "not applicable"
/// (a denominator was legitimately zero).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfitabilityMetrics {
    pub overcut_price: f64,
    pub undercut_price: f64,
    pub amount_received: f64,
    pub unit_profit: f64,

    pub max_flips_per_day: u64,
    pub bought_per_bid: Option<f64>,
    pub sold_per_offer: Option<f64>,
    pub demand_supply_gap: Option<f64>,

    pub buy_through_rate: f64,
    pub sell_through_rate: f64,
    pub flip_through_rate: f64,

    pub expected_profit_single: f64,
    pub expected_roi_single: Option<f64>,

    pub optimal_quantity: Option<u64>,
    pub dynamic_sell_through: Option<f64>,
    pub expected_sales_at_optimal: Option<f64>,
    pub expected_profit_at_optimal: Option<f64>,
    pub optimal_investment: Option<f64>,
    pub expected_roi_at_optimal: Option<f64>,
    pub time_to_sell: Option<f64>,  // days

    pub target_roi: f64,
    pub optimal_buy_price_for_target_roi: f64,
    pub optimal_quantity_for_target_roi: Option<u64>,
    pub theoretical_return_for_target_roi: Option<f64>,
    pub target_price_above_market: bool,
}

/// Seven-day view of an item built from hourly history.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoricalSummary {
    pub item_id: String,
    pub samples: usize,

    pub last_buy_price: f64,
    pub last_sell_price: f64,

    pub mean_demand: u64,
    pub mean_supply: u64,

    pub daily_bought: u64,
    pub daily_sold: u64,
    pub daily_bids: u64,
    pub daily_offers: u64,

    pub avg_buy_price: f64,  // median of non-zero hourly prices
    pub avg_sell_price: f64,
    pub std_dev_buy_price: f64,
    pub std_dev_sell_price: f64,
}

impl HistoricalSummary {
    /// Lets the history feed stand in for a scraped row.
    pub fn observation(&self) -> MarketObservation {
        MarketObservation {
            item_id: self.item_id.clone(),
            buy_price: self.last_buy_price,
            sell_price: self.last_sell_price,
            supply: self.mean_supply,
            demand: self.mean_demand,
            bought: self.daily_bought,
            sold: self.daily_sold,
            bids: self.daily_bids,
            offers: self.daily_offers,
        }
        .normalized()
    }
}

/// A manually placed order the user is following across scrapes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackedOrder {
    pub item_id: String,
    pub qty_ordered: u64,
    pub buy_price: f64,
    pub sell_price: Option<f64>,
    pub buy_placed: bool,
    pub sell_placed: bool,
    pub sold: bool,
}

/// Aggregated trading post history for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfitRow {
    pub item_id: u32,
    pub name: String,
    pub bought_qty: u64,
    pub sold_qty: u64,
    pub spent: f64,
    pub received: f64,
    pub profit: f64,
    pub roi: Option<f64>,
}
