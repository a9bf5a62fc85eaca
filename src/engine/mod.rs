//! Liquidity engine - Commitments, shape deployment, SLA and scores for one market
//!
//! All state is owned here and mutated only through `&mut self`; the order
//! book, clocks and pricing models are collaborators reached through the
//! traits in `core::traits`. Per-party state lives in `BTreeMap`s so every
//! walk over parties is in party-ID order.

mod deploy;
mod performance;
mod provisions;
mod snapshot;

use num_bigint::BigUint;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::core::{
    AuctionState, Broker, EngineConfig, Error, LiquidityProvision, OrderBook, PartyId, PriceMonitor,
    Result, RiskModel, SlaParams, TimeService, Timestamp,
};
use crate::events::Event;
use crate::num::mul_decimal_round;
use crate::scores::ScoreTracker;
use crate::sla::{PenaltyParams, SlaStats, SlaTracker};
use crate::snapshot::StateKind;
use crate::supplied::{self, ProbabilityCurves};

/// External collaborators of the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub time: Arc<dyn TimeService>,
    pub broker: Arc<dyn Broker>,
    pub order_book: Arc<dyn OrderBook>,
    pub auction: Arc<dyn AuctionState>,
    pub risk_model: Arc<dyn RiskModel>,
    pub price_monitor: Arc<dyn PriceMonitor>,
}

pub struct Engine {
    config: EngineConfig,

    time: Arc<dyn TimeService>,
    broker: Arc<dyn Broker>,
    order_book: Arc<dyn OrderBook>,
    auction: Arc<dyn AuctionState>,

    supplied: supplied::Engine,

    provisions: BTreeMap<PartyId, LiquidityProvision>,
    pending: BTreeMap<PartyId, LiquidityProvision>,

    sla: SlaTracker,
    scores: ScoreTracker,
    last_fee_distribution: Timestamp,

    // snapshot bookkeeping
    dirty: BTreeSet<StateKind>,
    cache: BTreeMap<StateKind, Vec<u8>>,
}

impl Engine {
    /// Fails on a configuration the engine cannot run with.
    pub fn new(config: EngineConfig, deps: Collaborators) -> Result<Self> {
        config.validate()?;
        let supplied = supplied::Engine::new(deps.risk_model, deps.price_monitor, &config);
        let sla = SlaTracker::new(hysteresis_len(&config.sla));

        tracing::info!(market = %config.market_id, asset = %config.asset, "liquidity engine created");

        Ok(Self {
            config,
            time: deps.time,
            broker: deps.broker,
            order_book: deps.order_book,
            auction: deps.auction,
            supplied,
            provisions: BTreeMap::new(),
            pending: BTreeMap::new(),
            sla,
            scores: ScoreTracker::new(),
            last_fee_distribution: 0,
            dirty: StateKind::ALL.into_iter().collect(),
            cache: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn market_id(&self) -> &str {
        &self.config.market_id
    }

    fn touch(&mut self, kinds: &[StateKind]) {
        self.dirty.extend(kinds.iter().copied());
    }

    fn send(&self, lp: &LiquidityProvision) {
        self.broker.send(Event::LiquidityProvision(lp.clone()));
    }

    /// commitment × stake-to-obligation factor, rounded to the nearest unit.
    fn obligation(&self, commitment: &BigUint) -> BigUint {
        mul_decimal_round(commitment, self.config.stake_to_obligation_factor)
    }

    fn penalty_params(&self) -> PenaltyParams {
        PenaltyParams {
            commitment_min_time_fraction: self.config.sla.commitment_min_time_fraction,
            sla_competition_factor: self.config.sla.sla_competition_factor,
            bond_penalty_slope: self.config.non_performance_bond_penalty_slope,
            bond_penalty_max: self.config.non_performance_bond_penalty_max,
        }
    }

    // ---------------------------------------------------------------------
    // network parameter updates
    // ---------------------------------------------------------------------

    pub fn on_maximum_liquidity_fee_factor_level_update(&mut self, v: Decimal) {
        self.config.max_fee = v;
        self.touch(&[StateKind::Parameters]);
    }

    pub fn on_supplied_stake_to_obligation_factor_update(&mut self, v: Decimal) {
        self.config.stake_to_obligation_factor = v;
        self.touch(&[StateKind::Parameters]);
    }

    pub fn on_stake_to_ccy_volume_update(&mut self, v: Decimal) {
        self.config.stake_to_ccy_volume = v;
        self.touch(&[StateKind::Parameters]);
    }

    pub fn on_non_performance_bond_penalty_slope_update(&mut self, v: Decimal) {
        self.config.non_performance_bond_penalty_slope = v;
        self.touch(&[StateKind::Parameters]);
    }

    pub fn on_non_performance_bond_penalty_max_update(&mut self, v: Decimal) {
        self.config.non_performance_bond_penalty_max = v;
        self.touch(&[StateKind::Parameters]);
    }

    pub fn on_providers_fee_calculation_time_step(&mut self, step: Timestamp) {
        self.config.fee_calculation_time_step = step;
        self.touch(&[StateKind::Parameters]);
    }

    pub fn on_market_liquidity_provision_shapes_max_size_update(&mut self, v: i64) -> Result<()> {
        let size = usize::try_from(v)
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| Error::Config(format!("shapes max size must be > 0, got {v}")))?;
        self.config.max_shape_size = size;
        self.touch(&[StateKind::Parameters]);
        Ok(())
    }

    pub fn on_min_probability_of_trading_lp_orders_update(&mut self, v: Decimal) {
        self.config.min_probability_of_trading = v;
        self.supplied.on_min_probability_of_trading_update(v);
        self.touch(&[StateKind::Parameters]);
    }

    pub fn on_probability_of_trading_tau_scaling_update(&mut self, v: Decimal) {
        self.config.probability_of_trading_tau_scaling = v;
        self.supplied.on_probability_of_trading_tau_scaling_update(v);
        self.touch(&[StateKind::Parameters]);
    }

    /// New market SLA parameters. A changed hysteresis window resizes every
    /// provider's penalty history. Invalid parameters leave the engine untouched.
    pub fn update_sla_params(&mut self, params: SlaParams) -> Result<()> {
        params.validate()?;
        self.sla.resize_hysteresis(hysteresis_len(&params));
        self.config.sla = params;
        self.touch(&[StateKind::Parameters, StateKind::Performances]);
        Ok(())
    }

    /// Swap the market's risk model and price monitor. Drops the agreed
    /// probability curves until the next consensus round.
    pub fn update_market_config(&mut self, risk_model: Arc<dyn RiskModel>, price_monitor: Arc<dyn PriceMonitor>) {
        self.supplied.update_market_config(risk_model, price_monitor);
        self.touch(&[StateKind::Supplied]);
    }

    // ---------------------------------------------------------------------
    // probability of trading consensus
    // ---------------------------------------------------------------------

    pub fn is_probability_of_trading_initialised(&self) -> bool {
        self.supplied.is_probability_of_trading_initialised()
    }

    pub fn calculate_probability_curves(&self, best_bid: Decimal, best_ask: Decimal) -> ProbabilityCurves {
        self.supplied.calculate_probability_curves(best_bid, best_ask)
    }

    pub fn on_probability_curves_agreed(&mut self, curves: ProbabilityCurves) {
        self.supplied.on_probability_curves_agreed(curves);
        self.touch(&[StateKind::Supplied]);
    }

    // ---------------------------------------------------------------------
    // queries
    // ---------------------------------------------------------------------

    /// True if the party holds an active or pending commitment.
    pub fn is_liquidity_provider(&self, party: &PartyId) -> bool {
        self.provisions.contains_key(party) || self.pending.contains_key(party)
    }

    pub fn provision_by_party(&self, party: &PartyId) -> Option<&LiquidityProvision> {
        self.provisions.get(party)
    }

    pub fn pending_provision_by_party(&self, party: &PartyId) -> Option<&LiquidityProvision> {
        self.pending.get(party)
    }

    /// Authoritative provisions, by party.
    pub fn provisions(&self) -> impl Iterator<Item = &LiquidityProvision> {
        self.provisions.values()
    }

    pub fn pending_provisions(&self) -> impl Iterator<Item = &LiquidityProvision> {
        self.pending.values()
    }

    /// Parties whose provision is not currently deployed.
    pub fn inactive_parties(&self) -> BTreeSet<PartyId> {
        self.provisions
            .values()
            .filter(|lp| lp.status != crate::core::LiquidityProvisionStatus::Active)
            .map(|lp| lp.party.clone())
            .collect()
    }

    pub fn sla_stats(&self, party: &PartyId) -> Option<&SlaStats> {
        self.sla.get(party).map(|p| &p.stats)
    }

    pub fn average_liquidity_scores(&self) -> &BTreeMap<PartyId, Decimal> {
        self.scores.average()
    }

    pub fn last_fee_distribution_time(&self) -> Timestamp {
        self.last_fee_distribution
    }

    /// Sum of all commitments. A pending amendment counts instead of the
    /// current commitment unless it lowers it.
    pub fn calculate_supplied_stake(&self) -> BigUint {
        let mut supplied = BigUint::default();

        for (party, pending) in &self.pending {
            match self.provisions.get(party) {
                Some(current) if pending.commitment_amount < current.commitment_amount => {
                    supplied += &current.commitment_amount;
                }
                _ => supplied += &pending.commitment_amount,
            }
        }

        for (party, lp) in &self.provisions {
            if !self.pending.contains_key(party) {
                supplied += &lp.commitment_amount;
            }
        }

        supplied
    }

    pub fn calculate_supplied_stake_without_pending(&self) -> BigUint {
        self.provisions.values().map(|lp| &lp.commitment_amount).sum()
    }

    // ---------------------------------------------------------------------
    // fee allocation cadence
    // ---------------------------------------------------------------------

    pub fn ready_for_fees_allocation(&self, now: Timestamp) -> bool {
        now - self.last_fee_distribution > self.config.fee_calculation_time_step
    }

    /// Start a new fee period at `t`; the running score average starts over.
    pub fn reset_fee_allocation_period(&mut self, t: Timestamp) {
        self.reset_average_liquidity_scores();
        self.last_fee_distribution = t;
        self.touch(&[StateKind::Parameters]);
    }
}

fn hysteresis_len(params: &SlaParams) -> usize {
    usize::try_from(params.performance_hysteresis_epochs).unwrap_or(usize::MAX)
}
