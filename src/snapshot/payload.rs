//! Payload bodies, one per sub-state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{LiquidityProvision, PartyId, SlaParams, Timestamp};
use crate::sla::SlaStats;
use crate::supplied::ProbabilityCurves;

use super::StateKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Provisions(ProvisionsState),
    PendingProvisions(ProvisionsState),
    Performances(PerformancesState),
    Supplied(SuppliedState),
    Scores(ScoresState),
    Parameters(ParametersState),
}

impl Payload {
    pub fn kind(&self) -> StateKind {
        match self {
            Payload::Provisions(_) => StateKind::Provisions,
            Payload::PendingProvisions(_) => StateKind::PendingProvisions,
            Payload::Performances(_) => StateKind::Performances,
            Payload::Supplied(_) => StateKind::Supplied,
            Payload::Scores(_) => StateKind::Scores,
            Payload::Parameters(_) => StateKind::Parameters,
        }
    }

    pub fn market_id(&self) -> &str {
        match self {
            Payload::Provisions(s) | Payload::PendingProvisions(s) => &s.market_id,
            Payload::Performances(s) => &s.market_id,
            Payload::Supplied(s) => &s.market_id,
            Payload::Scores(s) => &s.market_id,
            Payload::Parameters(s) => &s.market_id,
        }
    }
}

/// Provisions sorted by party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionsState {
    pub market_id: String,
    pub provisions: Vec<LiquidityProvision>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub party: PartyId,
    pub elapsed_meeting_sla: i64,
    pub commitment_start: Option<Timestamp>,
    /// Oldest first
    pub previous_penalties: Vec<Decimal>,
    pub stats: SlaStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformancesState {
    pub market_id: String,
    pub epoch_start: Timestamp,
    pub hysteresis_epochs: u64,
    pub performances: Vec<PerformanceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppliedState {
    pub market_id: String,
    pub curves: Option<ProbabilityCurves>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoresState {
    pub market_id: String,
    pub running_average_counter: u64,
    pub scores: Vec<(PartyId, Decimal)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParametersState {
    pub market_id: String,
    pub max_fee: Decimal,
    pub max_shape_size: u64,
    pub stake_to_obligation_factor: Decimal,
    pub stake_to_ccy_volume: Decimal,
    pub non_performance_bond_penalty_slope: Decimal,
    pub non_performance_bond_penalty_max: Decimal,
    pub fee_calculation_time_step: Timestamp,
    pub min_probability_of_trading: Decimal,
    pub probability_of_trading_tau_scaling: Decimal,
    pub sla: SlaParams,
    pub last_fee_distribution: Timestamp,
}
