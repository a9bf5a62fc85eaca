//! In-memory collaborators - Deterministic stand-ins for the exchange
//!
//! Used by the tests and by the `sla_sim` scenario runner. Every type is
//! shareable behind an `Arc` and mutated through `&self`, like the real
//! services the engine talks to.

use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::core::{
    AuctionState, Broker, IdGen, Order, OrderBook, OrderStatus, PartyId, PriceMonitor, RiskModel, TimeService,
    Timestamp, ToCancel,
};
use crate::events::Event;
use crate::num::WrappedDecimal;

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self { now: AtomicI64::new(now) }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Timestamp) -> Timestamp {
        self.now.fetch_add(by, Ordering::SeqCst) + by
    }
}

impl TimeService for FixedClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone)]
struct Prices {
    best_bid: Option<u64>,
    best_ask: Option<u64>,
    last_traded: Option<u64>,
    indicative: Option<u64>,
}

/// Order book holding resting orders per party, keyed by order ID.
#[derive(Debug, Default)]
pub struct InMemoryOrderBook {
    orders: RwLock<BTreeMap<PartyId, BTreeMap<String, Order>>>,
    prices: RwLock<Prices>,
}

impl InMemoryOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, order: Order) {
        self.orders.write().entry(order.party.clone()).or_default().insert(order.id.clone(), order);
    }

    /// Replace everything a party has resting.
    pub fn set_orders(&self, party: &PartyId, orders: Vec<Order>) {
        let book: BTreeMap<String, Order> = orders.into_iter().map(|o| (o.id.clone(), o)).collect();
        self.orders.write().insert(party.clone(), book);
    }

    pub fn set_prices(&self, best_bid: Option<u64>, best_ask: Option<u64>, last: Option<u64>, indicative: Option<u64>) {
        *self.prices.write() = Prices { best_bid, best_ask, last_traded: last, indicative };
    }

    /// Execute a deployment diff: cancels first, then creates.
    pub fn apply(&self, creates: Vec<Order>, cancels: Vec<ToCancel>) {
        {
            let mut orders = self.orders.write();
            for c in cancels {
                if let Some(book) = orders.get_mut(&c.party) {
                    for id in &c.order_ids {
                        book.remove(id);
                    }
                }
            }
        }
        for order in creates {
            self.add(order);
        }
    }

    /// Trade `qty` off a resting order.
    pub fn fill(&self, party: &PartyId, order_id: &str, qty: u64) {
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(party).and_then(|b| b.get_mut(order_id)) else {
            tracing::debug!(%party, %order_id, "fill on unknown order ignored");
            return;
        };
        order.remaining = order.remaining.saturating_sub(qty);
        if order.remaining == 0 {
            order.status = OrderStatus::Filled;
        }
    }
}

impl OrderBook for InMemoryOrderBook {
    fn orders_per_party(&self, party: &PartyId) -> Vec<Order> {
        self.orders.read().get(party).map(|b| b.values().cloned().collect()).unwrap_or_default()
    }

    fn best_static_bid_price(&self) -> Option<BigUint> {
        self.prices.read().best_bid.map(BigUint::from)
    }

    fn best_static_ask_price(&self) -> Option<BigUint> {
        self.prices.read().best_ask.map(BigUint::from)
    }

    fn indicative_price(&self) -> Option<BigUint> {
        self.prices.read().indicative.map(BigUint::from)
    }

    fn last_traded_price(&self) -> Option<BigUint> {
        self.prices.read().last_traded.map(BigUint::from)
    }
}

#[derive(Debug, Default)]
pub struct StaticAuction {
    in_auction: AtomicBool,
    opening: AtomicBool,
}

impl StaticAuction {
    pub fn new(in_auction: bool, opening: bool) -> Self {
        Self { in_auction: AtomicBool::new(in_auction), opening: AtomicBool::new(opening) }
    }

    pub fn set_in_auction(&self, v: bool) {
        self.in_auction.store(v, Ordering::SeqCst);
    }

    /// The opening auction is an auction too.
    pub fn set_opening_auction(&self, v: bool) {
        self.opening.store(v, Ordering::SeqCst);
    }
}

impl AuctionState for StaticAuction {
    fn in_auction(&self) -> bool {
        self.in_auction.load(Ordering::SeqCst) || self.opening.load(Ordering::SeqCst)
    }

    fn is_opening_auction(&self) -> bool {
        self.opening.load(Ordering::SeqCst)
    }
}

/// Same probability at every price, horizon of one year fraction unit.
#[derive(Debug, Clone)]
pub struct FlatRiskModel {
    probability: Decimal,
}

impl FlatRiskModel {
    pub fn new(probability: Decimal) -> Self {
        Self { probability }
    }
}

impl RiskModel for FlatRiskModel {
    fn probability_of_trading(
        &self,
        _current_price: Decimal,
        order_price: Decimal,
        min_price: Decimal,
        max_price: Decimal,
        _year_fraction: Decimal,
        _is_bid: bool,
        apply_bounds: bool,
    ) -> Decimal {
        if apply_bounds && (order_price < min_price || order_price > max_price) {
            return Decimal::ZERO;
        }
        self.probability
    }

    fn projection_horizon(&self) -> Decimal {
        Decimal::ONE
    }
}

/// Fixed valid price range, identical in both precisions.
#[derive(Debug, Clone)]
pub struct StaticPriceMonitor {
    min: Decimal,
    max: Decimal,
}

impl StaticPriceMonitor {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }
}

impl PriceMonitor for StaticPriceMonitor {
    fn valid_price_range(&self) -> (WrappedDecimal, WrappedDecimal) {
        (WrappedDecimal::new(self.min, self.min), WrappedDecimal::new(self.max, self.max))
    }
}

/// Hex IDs from a counter.
#[derive(Debug, Default)]
pub struct SequentialIdGen {
    next: u64,
}

impl SequentialIdGen {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGen for SequentialIdGen {
    fn next_id(&mut self) -> String {
        self.next += 1;
        hex::encode(format!("deadb33f{}", self.next))
    }
}

/// Broker keeping every event in send order.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    events: Mutex<Vec<Event>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl Broker for RecordingBroker {
    fn send(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn send_batch(&self, events: Vec<Event>) {
        self.events.lock().extend(events);
    }
}
