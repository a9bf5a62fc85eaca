//! Supplied-liquidity engine
//!
//! Turns an obligation plus a priced shape into order volumes, and measures
//! how much liquidity (and how good) a set of resting orders supplies.

pub mod probability;

use num_bigint::BigUint;
use num_traits::Zero;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::core::{EngineConfig, LiquidityOrder, Order, PriceMonitor, RiskModel, Side};
use crate::num::{div_ceil, uint_to_decimal, uint_to_u64_saturating};
pub use probability::{ProbabilityCurve, ProbabilityCurves};
use probability::clamp;

/// Shape element being priced and sized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeOrder {
    pub order_id: String,
    pub details: LiquidityOrder,
    /// None when the peg could not be priced
    pub price: Option<BigUint>,
    pub implied_volume: u64,
}

impl ShapeOrder {
    pub fn new(order_id: impl Into<String>, details: LiquidityOrder) -> Self {
        Self { order_id: order_id.into(), details, price: None, implied_volume: 0 }
    }
}

pub struct Engine {
    risk_model: Arc<dyn RiskModel>,
    price_monitor: Arc<dyn PriceMonitor>,

    min_probability: Decimal,
    tau_scaling: Decimal,
    default_in_range_probability: Decimal,
    default_range: Decimal,
    offset_step: Decimal,
    offset_count: usize,

    /// None until the curves reach consensus
    curves: Option<ProbabilityCurves>,
}

impl Engine {
    pub fn new(
        risk_model: Arc<dyn RiskModel>,
        price_monitor: Arc<dyn PriceMonitor>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            risk_model,
            price_monitor,
            min_probability: config.min_probability_of_trading,
            tau_scaling: config.probability_of_trading_tau_scaling,
            default_in_range_probability: config.default_in_range_probability,
            default_range: config.default_probability_range,
            offset_step: config.probability_offset_step,
            offset_count: config.probability_offset_count,
            curves: None,
        }
    }

    pub fn on_min_probability_of_trading_update(&mut self, v: Decimal) {
        self.min_probability = v;
    }

    pub fn on_probability_of_trading_tau_scaling_update(&mut self, v: Decimal) {
        self.tau_scaling = v;
    }

    /// New risk model or monitor: the agreed curves no longer apply.
    pub fn update_market_config(&mut self, risk_model: Arc<dyn RiskModel>, price_monitor: Arc<dyn PriceMonitor>) {
        self.risk_model = risk_model;
        self.price_monitor = price_monitor;
        self.curves = None;
    }

    pub fn is_probability_of_trading_initialised(&self) -> bool {
        self.curves.is_some()
    }

    pub fn curves(&self) -> Option<&ProbabilityCurves> {
        self.curves.as_ref()
    }

    /// Candidate curves for a consensus round.
    pub fn calculate_probability_curves(&self, best_bid: Decimal, best_ask: Decimal) -> ProbabilityCurves {
        let (min, max) = self.price_monitor.valid_price_range();
        let (min, max) = (min.representation, max.representation);
        let year_fraction = self.risk_model.projection_horizon() * self.tau_scaling;

        let mut bid = Vec::with_capacity(self.offset_count);
        let mut ask = Vec::with_capacity(self.offset_count);
        for i in 0..self.offset_count {
            let offset = self.offset_step * Decimal::from(i as u64);

            let bid_price = best_bid * (Decimal::ONE - offset);
            if bid_price > Decimal::ZERO {
                let p = self.risk_model.probability_of_trading(best_bid, bid_price, min, max, year_fraction, true, true);
                bid.push((offset, clamp(p, self.min_probability, Decimal::ONE)));
            }

            let ask_price = best_ask * (Decimal::ONE + offset);
            let p = self.risk_model.probability_of_trading(best_ask, ask_price, min, max, year_fraction, false, true);
            ask.push((offset, clamp(p, self.min_probability, Decimal::ONE)));
        }

        ProbabilityCurves {
            bid: ProbabilityCurve::from_points(bid),
            ask: ProbabilityCurve::from_points(ask),
        }
    }

    /// Install the consensus result.
    pub fn on_probability_curves_agreed(&mut self, curves: ProbabilityCurves) {
        tracing::debug!(bid_points = curves.bid.len(), ask_points = curves.ask.len(), "probability of trading curves agreed");
        self.curves = Some(curves);
    }

    pub(crate) fn restore_curves(&mut self, curves: Option<ProbabilityCurves>) {
        self.curves = curves;
    }

    /// Probability that an order at `price` trades, for a price already known
    /// to be inside the valid band.
    pub fn probability_of_trading(&self, side: Side, price: Decimal, best_bid: Decimal, best_ask: Decimal) -> Decimal {
        match &self.curves {
            None => {
                let in_range = match side {
                    Side::Buy => price >= best_bid * (Decimal::ONE - self.default_range),
                    Side::Sell => price <= best_ask * (Decimal::ONE + self.default_range),
                };
                if in_range { self.default_in_range_probability } else { self.min_probability }
            }
            Some(curves) => {
                let (curve, touch, distance) = match side {
                    Side::Buy => (&curves.bid, best_bid, best_bid - price),
                    Side::Sell => (&curves.ask, best_ask, price - best_ask),
                };
                if touch <= Decimal::ZERO {
                    return self.min_probability;
                }
                let offset = (distance / touch).max(Decimal::ZERO);
                curve.lookup(offset, self.min_probability)
            }
        }
    }

    /// Volume-weighted probability of trading of each side; the lesser side wins.
    pub fn calculate_liquidity_score(
        &self,
        orders: &[Order],
        best_bid: Decimal,
        best_ask: Decimal,
        min_price: Decimal,
        max_price: Decimal,
    ) -> Decimal {
        let mut weighted = [Decimal::ZERO, Decimal::ZERO];
        let mut volume = [Decimal::ZERO, Decimal::ZERO];

        for o in orders.iter().filter(|o| o.is_active() && o.remaining > 0) {
            let idx = side_index(o.side);
            let size = Decimal::from(o.remaining);
            let price = uint_to_decimal(&o.price);
            let probability = if price < min_price || price > max_price {
                Decimal::ZERO
            } else {
                self.probability_of_trading(o.side, price, best_bid, best_ask)
            };
            weighted[idx] += probability * size;
            volume[idx] += size;
        }

        let avg = |i: usize| {
            if volume[i].is_zero() { Decimal::ZERO } else { weighted[i] / volume[i] }
        };
        avg(0).min(avg(1))
    }

    /// Notional (price × remaining) supplied within the band; the lesser side wins.
    pub fn calculate_supplied_liquidity(&self, orders: &[Order], min_price: &BigUint, max_price: &BigUint) -> BigUint {
        let buys = side_notional(orders, Side::Buy, min_price, max_price, |_| true);
        let sells = side_notional(orders, Side::Sell, min_price, max_price, |_| true);
        buys.min(sells)
    }

    /// Size each shape order so that, together with the party's other resting
    /// orders, every side supplies at least `obligation`.
    ///
    /// The shortfall is split across in-band shape orders pro rata to their
    /// proportion, and each order's volume is `ceil(shortfall × p / (P × price))`.
    pub fn calculate_liquidity_implied_volumes(
        &self,
        obligation: &BigUint,
        resting: &[Order],
        min_price: &BigUint,
        max_price: &BigUint,
        buys: &mut [ShapeOrder],
        sells: &mut [ShapeOrder],
    ) {
        for (side, shape) in [(Side::Buy, buys), (Side::Sell, sells)] {
            let supplied = side_notional(resting, side, min_price, max_price, |o| !o.is_liquidity_order());
            let shortfall = if supplied >= *obligation { BigUint::zero() } else { obligation - &supplied };
            allocate(&shortfall, min_price, max_price, shape);
        }
    }
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

fn in_band(price: &BigUint, min: &BigUint, max: &BigUint) -> bool {
    price >= min && price <= max
}

fn side_notional(
    orders: &[Order],
    side: Side,
    min: &BigUint,
    max: &BigUint,
    keep: impl Fn(&Order) -> bool,
) -> BigUint {
    orders
        .iter()
        .filter(|o| o.side == side && o.is_active() && in_band(&o.price, min, max) && keep(o))
        .map(Order::notional)
        .sum()
}

fn allocate(shortfall: &BigUint, min: &BigUint, max: &BigUint, shape: &mut [ShapeOrder]) {
    let deployable = |o: &ShapeOrder| o.price.as_ref().is_some_and(|p| !p.is_zero() && in_band(p, min, max));

    let total: u64 = shape.iter().filter(|o| deployable(o)).map(|o| u64::from(o.details.proportion)).sum();

    for order in shape.iter_mut() {
        order.implied_volume = 0;
        if total == 0 || shortfall.is_zero() || !deployable(order) {
            continue;
        }
        let Some(price) = order.price.as_ref() else { continue };
        let numerator = shortfall * BigUint::from(order.details.proportion);
        let denominator = BigUint::from(total) * price;
        order.implied_volume = uint_to_u64_saturating(&div_ceil(&numerator, &denominator));
    }
}
