//! Scenario runner - Drive one market through a scripted sequence of blocks
//!
//! Usage: `sla_sim <scenario.toml>`. Prints epoch penalties, the final score
//! average and the hash of every snapshot key as JSON on stdout.

use anyhow::Context;
use num_bigint::BigUint;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use liquidity_sla::broker::ChannelBroker;
use liquidity_sla::core::{
    LiquidityOrder, LiquidityProvisionAmendment, LiquidityProvisionStatus, LiquidityProvisionSubmission, Order,
    OrderBook, OrderStatus, PartyId, PeggedReference, SlaPenalties, Side, TimeService, Timestamp,
};
use liquidity_sla::sim::{FixedClock, FlatRiskModel, InMemoryOrderBook, SequentialIdGen, StaticAuction, StaticPriceMonitor};
use liquidity_sla::{Collaborators, Engine, EngineConfig, Error, Event};

const SEC: Timestamp = 1_000_000_000;

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    config: EngineConfig,
    #[serde(default = "default_probability")]
    probability_of_trading: Decimal,
    #[serde(default = "default_valid_min")]
    valid_min_price: Decimal,
    #[serde(default = "default_valid_max")]
    valid_max_price: Decimal,
    #[serde(default)]
    steps: Vec<Step>,
}

fn default_probability() -> Decimal {
    Decimal::new(5, 1)
}
fn default_valid_min() -> Decimal {
    Decimal::ONE
}
fn default_valid_max() -> Decimal {
    Decimal::from(1_000_000)
}

#[derive(Debug, Deserialize)]
struct ShapeEntry {
    reference: PeggedReference,
    proportion: u32,
    offset: u64,
}

impl From<ShapeEntry> for LiquidityOrder {
    fn from(e: ShapeEntry) -> Self {
        LiquidityOrder::new(e.reference, e.proportion, e.offset)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Step {
    OpeningAuction { active: bool },
    Auction { active: bool },
    Prices { best_bid: Option<u64>, best_ask: Option<u64>, last: Option<u64>, indicative: Option<u64> },
    Advance { seconds: i64 },
    Submit { party: String, commitment: u64, fee: Decimal, buys: Vec<ShapeEntry>, sells: Vec<ShapeEntry> },
    Amend { party: String, commitment: Option<u64>, fee: Option<Decimal> },
    Cancel { party: String },
    Resting { party: String, id: String, side: Side, price: u64, size: u64 },
    Deploy { min_price: u64, max_price: u64 },
    EndBlock,
    EpochStart,
    EpochEnd,
    UpdateScores { min_price: u64, max_price: u64 },
}

#[derive(Debug, Serialize)]
struct EpochPenalties {
    time: Timestamp,
    #[serde(flatten)]
    penalties: SlaPenalties,
}

#[derive(Debug, Serialize)]
struct Report {
    penalties: Vec<EpochPenalties>,
    scores: BTreeMap<PartyId, Decimal>,
    supplied_stake: String,
    events: usize,
    state_hashes: BTreeMap<String, String>,
}

struct Sim {
    engine: Engine,
    clock: Arc<FixedClock>,
    book: Arc<InMemoryOrderBook>,
    auction: Arc<StaticAuction>,
    events: flume::Receiver<Event>,
    ids: SequentialIdGen,
    penalties: Vec<EpochPenalties>,
}

impl Sim {
    fn new(scenario: &Scenario) -> liquidity_sla::Result<Self> {
        let clock = Arc::new(FixedClock::new(SEC));
        let book = Arc::new(InMemoryOrderBook::new());
        let auction = Arc::new(StaticAuction::new(false, false));
        let (broker, events) = ChannelBroker::new();
        let engine = Engine::new(
            scenario.config.clone(),
            Collaborators {
                time: clock.clone(),
                broker: Arc::new(broker),
                order_book: book.clone(),
                auction: auction.clone(),
                risk_model: Arc::new(FlatRiskModel::new(scenario.probability_of_trading)),
                price_monitor: Arc::new(StaticPriceMonitor::new(scenario.valid_min_price, scenario.valid_max_price)),
            },
        )?;
        Ok(Self { engine, clock, book, auction, events, ids: SequentialIdGen::new(), penalties: Vec::new() })
    }

    fn touch_prices(&self) -> (Option<BigUint>, Option<BigUint>) {
        (self.book.best_static_bid_price(), self.book.best_static_ask_price())
    }

    fn step(&mut self, step: Step) -> anyhow::Result<()> {
        let now = self.clock.now();
        match step {
            Step::OpeningAuction { active } => self.auction.set_opening_auction(active),
            Step::Auction { active } => self.auction.set_in_auction(active),
            Step::Prices { best_bid, best_ask, last, indicative } => {
                self.book.set_prices(best_bid, best_ask, last, indicative)
            }
            Step::Advance { seconds } => {
                self.clock.advance(seconds * SEC);
            }
            Step::Submit { party, commitment, fee, buys, sells } => {
                let sub = LiquidityProvisionSubmission {
                    market_id: self.engine.market_id().to_string(),
                    commitment_amount: BigUint::from(commitment),
                    fee,
                    reference: format!("{party}-lp"),
                    buys: buys.into_iter().map(Into::into).collect(),
                    sells: sells.into_iter().map(Into::into).collect(),
                };
                report(&party, self.engine.submit(sub, &PartyId::from(party.as_str()), &mut self.ids).map(|_| ()));
            }
            Step::Amend { party, commitment, fee } => {
                let amendment = LiquidityProvisionAmendment {
                    market_id: self.engine.market_id().to_string(),
                    commitment_amount: commitment.map(BigUint::from),
                    fee,
                    ..Default::default()
                };
                let res = self.engine.amend(amendment, &PartyId::from(party.as_str()), &mut self.ids);
                if let Ok(to_cancel) = &res {
                    self.book.apply(Vec::new(), vec![to_cancel.clone()]);
                }
                report(&party, res.map(|_| ()));
            }
            Step::Cancel { party } => {
                let res = self.engine.cancel(&PartyId::from(party.as_str()));
                if let Ok(to_cancel) = &res {
                    self.book.apply(Vec::new(), vec![to_cancel.clone()]);
                }
                report(&party, res.map(|_| ()));
            }
            Step::Resting { party, id, side, price, size } => self.book.add(Order {
                id,
                market_id: self.engine.market_id().to_string(),
                party: PartyId::from(party),
                side,
                price: BigUint::from(price),
                size,
                remaining: size,
                status: OrderStatus::Active,
                reference: String::new(),
                liquidity_provision_id: None,
                created_at: now,
            }),
            Step::Deploy { min_price, max_price } => {
                let (bid, ask) = self.touch_prices();
                let reprice = move |side: Side, reference: PeggedReference, offset: &BigUint| {
                    peg_price(bid.as_ref(), ask.as_ref(), side, reference, offset)
                };
                let (creates, cancels) =
                    self.engine.update(&BigUint::from(min_price), &BigUint::from(max_price), reprice);
                tracing::debug!(creates = creates.len(), cancels = cancels.len(), "shapes deployed");
                self.book.apply(creates, cancels);
            }
            Step::EndBlock => self.engine.end_block(),
            Step::EpochStart => {
                let applied = self.engine.apply_pending_provisions(now);
                for (party, lp) in &applied {
                    if lp.status == LiquidityProvisionStatus::Stopped {
                        let to_cancel = self.engine.liquidity_orders_to_cancel(party);
                        self.book.apply(Vec::new(), vec![to_cancel]);
                    }
                }
                tracing::info!(applied = applied.len(), "epoch started");
                self.engine.reset_sla_epoch(now);
            }
            Step::EpochEnd => {
                let penalties = self.engine.calculate_sla_penalties(now);
                self.penalties.push(EpochPenalties { time: now, penalties });
            }
            Step::UpdateScores { min_price, max_price } => {
                let (Some(bid), Some(ask)) = self.touch_prices() else {
                    tracing::warn!("no best bid/ask, scores not updated");
                    return Ok(());
                };
                self.engine.update_average_liquidity_scores(
                    liquidity_sla::num::uint_to_decimal(&bid),
                    liquidity_sla::num::uint_to_decimal(&ask),
                    &BigUint::from(min_price),
                    &BigUint::from(max_price),
                );
            }
        }
        Ok(())
    }

    fn report(mut self) -> anyhow::Result<Report> {
        let mut state_hashes = BTreeMap::new();
        for key in self.engine.keys() {
            let hash = self.engine.state_hash(&key).with_context(|| format!("hashing {key}"))?;
            state_hashes.insert(key, hash);
        }
        Ok(Report {
            penalties: self.penalties,
            scores: self.engine.average_liquidity_scores().clone(),
            supplied_stake: self.engine.calculate_supplied_stake().to_string(),
            events: self.events.try_iter().count(),
            state_hashes,
        })
    }
}

fn peg_price(
    bid: Option<&BigUint>,
    ask: Option<&BigUint>,
    side: Side,
    reference: PeggedReference,
    offset: &BigUint,
) -> liquidity_sla::Result<BigUint> {
    let base = match (reference, bid, ask) {
        (PeggedReference::BestBid, Some(b), _) => b.clone(),
        (PeggedReference::BestAsk, _, Some(a)) => a.clone(),
        (PeggedReference::Mid, Some(b), Some(a)) => (b + a) / 2u32,
        _ => return Err(Error::Reprice(format!("no price for {reference:?}"))),
    };
    match side {
        Side::Buy if offset >= &base => Err(Error::Reprice(format!("offset {offset} at or below zero"))),
        Side::Buy => Ok(base - offset),
        Side::Sell => Ok(base + offset),
    }
}

fn report(party: &str, res: liquidity_sla::Result<()>) {
    if let Err(e) = res {
        tracing::warn!(%party, error = %e, "transaction rejected");
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,liquidity_sla=debug"));
    fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();

    let path = std::env::args().nth(1).context("usage: sla_sim <scenario.toml>")?;
    let content = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let scenario: Scenario = toml::from_str(&content).with_context(|| format!("parsing {path}"))?;
    tracing::info!(market = %scenario.config.market_id, steps = scenario.steps.len(), "running scenario");

    let mut sim = Sim::new(&scenario)?;
    for (i, step) in scenario.steps.into_iter().enumerate() {
        sim.step(step).with_context(|| format!("step {i}"))?;
    }

    let report = sim.report()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
