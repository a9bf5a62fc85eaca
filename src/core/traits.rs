//! Core traits - Collaborators the engine consumes but never owns
//!
//! Every input (time, prices, book contents) is handed over synchronously as
//! a plain value. Nothing here performs I/O on the engine's behalf.

use num_bigint::BigUint;
use rust_decimal::Decimal;

use crate::core::types::{Order, PartyId, Timestamp};
use crate::events::Event;
use crate::num::WrappedDecimal;

/// Consensus time source
pub trait TimeService: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Probability of trading and projection horizon of the market's risk model.
pub trait RiskModel: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn probability_of_trading(
        &self,
        current_price: Decimal,
        order_price: Decimal,
        min_price: Decimal,
        max_price: Decimal,
        year_fraction: Decimal,
        is_bid: bool,
        apply_bounds: bool,
    ) -> Decimal;

    fn projection_horizon(&self) -> Decimal;
}

/// Range of prices that would not trigger price monitoring.
pub trait PriceMonitor: Send + Sync {
    fn valid_price_range(&self) -> (WrappedDecimal, WrappedDecimal);
}

/// Read-only view of the order book
pub trait OrderBook: Send + Sync {
    fn orders_per_party(&self, party: &PartyId) -> Vec<Order>;

    fn best_static_bid_price(&self) -> Option<BigUint>;

    fn best_static_ask_price(&self) -> Option<BigUint>;

    fn indicative_price(&self) -> Option<BigUint>;

    fn last_traded_price(&self) -> Option<BigUint>;
}

/// Trading mode of the market
pub trait AuctionState: Send + Sync {
    fn in_auction(&self) -> bool;

    fn is_opening_auction(&self) -> bool;
}

/// Event bus. Fire-and-forget: never blocks, never retries.
pub trait Broker: Send + Sync {
    fn send(&self, event: Event);

    fn send_batch(&self, events: Vec<Event>);
}

/// Deterministic, collision-free ID source
pub trait IdGen {
    fn next_id(&mut self) -> String;
}
