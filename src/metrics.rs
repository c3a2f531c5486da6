use rayon::prelude::*;
use statrs::distribution::{Binomial, Discrete};

use crate::model::{MarketObservation, Parameters, ProfitabilityMetrics};

pub fn compute_metrics(obs: &MarketObservation, params: &Parameters) -> ProfitabilityMetrics {
    let fee = params.trading_post_fee;

    let overcut_price = obs.buy_price * params.overcut_pct;
    let undercut_price = obs.sell_price * params.undercut_pct;
    let amount_received = undercut_price * fee;
    let unit_profit = amount_received - overcut_price;

    let max_flips_per_day = obs.bought.min(obs.sold);

    let buy_through_rate = through_rate(obs.bought, obs.bids);
    let sell_through_rate = through_rate(obs.sold, obs.offers);
    let flip_through_rate = buy_through_rate * sell_through_rate;

    let expected_profit_single = undercut_price * fee * sell_through_rate - overcut_price;
    let expected_roi_single = ratio(expected_profit_single, overcut_price);

    let optimal_quantity = sqrt_quantity(obs, undercut_price, fee, overcut_price);

    // Everything past the order size only means something for a non-empty order.
    let placed = optimal_quantity.filter(|&q| q > 0);

    let queue_after = |q: u64| obs.offers as f64 + q as f64;
    let dynamic_sell_through = placed.map(|q| (obs.sold as f64 / queue_after(q)).min(1.0));
    let expected_sales_at_optimal = placed
        .zip(dynamic_sell_through)
        .map(|(q, rate)| q as f64 * rate);
    let expected_profit_at_optimal = placed
        .zip(expected_sales_at_optimal)
        .map(|(q, sales)| sales * amount_received - overcut_price * q as f64);
    let optimal_investment = optimal_quantity.map(|q| q as f64 * overcut_price);
    let expected_roi_at_optimal = expected_profit_at_optimal
        .zip(optimal_investment)
        .and_then(|(profit, invested)| ratio(profit, invested));
    let time_to_sell = placed.and_then(|q| ratio(queue_after(q), obs.sold as f64));

    let optimal_buy_price_for_target_roi = target_buy_price(amount_received, params.target_roi);
    let optimal_quantity_for_target_roi =
        sqrt_quantity(obs, undercut_price, fee, optimal_buy_price_for_target_roi);
    let theoretical_return_for_target_roi = optimal_quantity_for_target_roi
        .map(|q| (amount_received - optimal_buy_price_for_target_roi) * q as f64);

    ProfitabilityMetrics {
        overcut_price,
        undercut_price,
        amount_received,
        unit_profit,

        max_flips_per_day,
        bought_per_bid: ratio(obs.bought as f64, obs.bids as f64),
        sold_per_offer: ratio(obs.sold as f64, obs.offers as f64),
        demand_supply_gap: ratio(obs.demand as f64 - obs.supply as f64, obs.supply as f64),

        buy_through_rate,
        sell_through_rate,
        flip_through_rate,

        expected_profit_single,
        expected_roi_single,

        optimal_quantity,
        dynamic_sell_through,
        expected_sales_at_optimal,
        expected_profit_at_optimal,
        optimal_investment,
        expected_roi_at_optimal,
        time_to_sell,

        target_roi: params.target_roi,
        optimal_buy_price_for_target_roi,
        optimal_quantity_for_target_roi,
        theoretical_return_for_target_roi,
        target_price_above_market: optimal_buy_price_for_target_roi > obs.buy_price,
    }
}

/// Same as mapping `compute_metrics`, evaluated in parallel. Output order matches input.
pub fn compute_batch(observations: &[MarketObservation], params: &Parameters) -> Vec<ProfitabilityMetrics> {
    observations
        .par_iter()
        .map(|obs| compute_metrics(obs, params))
        .collect()
}

/// Share of standing listings that traded in the window, capped at 1.
/// With no listings, any trade at all counts as a full fill.
pub fn through_rate(traded: u64, listings: u64) -> f64 {
    if listings == 0 {
        if traded > 0 { 1.0 } else { 0.0 }
    } else {
        (traded as f64 / listings as f64).min(1.0)
    }
}

/// Square-root order size: round(sqrt(sold * offers * undercut * fee / buy_at) - offers),
/// clamped to [0, min(bought, sold)]. `None` when `buy_at` is zero.
pub fn sqrt_quantity(obs: &MarketObservation, undercut_price: f64, fee: f64, buy_at: f64) -> Option<u64> {
    let inner = ratio(obs.sold as f64 * obs.offers as f64 * undercut_price * fee, buy_at)?;
    if !inner.is_finite() || inner < 0.0 {
        return None;
    }

    let raw = (inner.sqrt() - obs.offers as f64).round();
    if raw <= 0.0 {
        return Some(0);
    }
    Some((raw as u64).min(obs.bought.min(obs.sold)))
}

/// Highest buy price that still clears `target_roi` after the fee. Never negative.
pub fn target_buy_price(amount_received: f64, target_roi: f64) -> f64 {
    ratio(amount_received, 1.0 + target_roi)
        .map(|p| p.max(0.0))
        .unwrap_or(0.0)
}

/// Probability that all `qty` units fill when each fills independently at `rate`.
pub fn fill_probability(qty: u64, rate: f64) -> Option<f64> {
    let dist = Binomial::new(rate, qty).ok()?;
    Some(dist.pmf(qty))
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    if den == 0.0 || !den.is_finite() {
        return None;
    }
    let v = num / den;
    v.is_finite().then_some(v)
}
