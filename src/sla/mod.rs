//! SLA performance tracking
//!
//! Block by block the engine reports whether each provider covers its
//! required notional on both sides. Only the edges are stored: compliant time
//! is a running sum plus the timestamp the current compliant stretch began.
//! At epoch end the fraction of the epoch spent compliant becomes a fee and a
//! bond penalty, with the fee smoothed over the trailing epochs.

pub mod ring;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{PartyId, SlaPenalties, SlaPenalty, Timestamp};
pub use ring::SliceRing;

/// Last observed SLA figures of one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaStats {
    pub last_epoch_time_book_fraction: Decimal,
    pub last_epoch_fee_penalty: Decimal,
    pub last_epoch_bond_penalty: Decimal,
    pub required_liquidity: Decimal,
    pub notional_volume_buys: Decimal,
    pub notional_volume_sells: Decimal,
}

/// One block's observation of a provider's resting orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaSample {
    pub required: Decimal,
    pub notional_buys: Decimal,
    pub notional_sells: Decimal,
    pub meets: bool,
}

impl SlaSample {
    /// No valid price band this block: nothing counts.
    pub fn unpriced(required: Decimal) -> Self {
        Self { required, notional_buys: Decimal::ZERO, notional_sells: Decimal::ZERO, meets: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaPerformance {
    /// Nanoseconds spent compliant this epoch, closed stretches only
    pub elapsed_meeting_sla: i64,
    /// Start of the current compliant stretch
    pub commitment_start: Option<Timestamp>,
    pub previous_penalties: SliceRing<Decimal>,
    pub stats: SlaStats,
}

impl SlaPerformance {
    pub fn new(hysteresis_epochs: usize) -> Self {
        Self {
            elapsed_meeting_sla: 0,
            commitment_start: None,
            previous_penalties: SliceRing::new(hysteresis_epochs),
            stats: SlaStats::default(),
        }
    }

    fn close_stretch(&mut self, now: Timestamp) {
        if let Some(start) = self.commitment_start {
            self.elapsed_meeting_sla += (now - start).max(0);
        }
    }

    fn previous_average(&self) -> Decimal {
        let n = self.previous_penalties.len();
        if n == 0 {
            return Decimal::ZERO;
        }
        let sum: Decimal = self.previous_penalties.iter().copied().sum();
        sum / Decimal::from(n as u64)
    }
}

/// Parameters of the epoch-end penalty formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PenaltyParams {
    pub commitment_min_time_fraction: Decimal,
    pub sla_competition_factor: Decimal,
    pub bond_penalty_slope: Decimal,
    pub bond_penalty_max: Decimal,
}

/// Penalties for one epoch, before hysteresis.
///
/// Below the minimum time fraction the whole fee is lost and the bond is
/// slashed along `slope × (1 − f/min)`, capped at the maximum. At or above
/// it the fee penalty falls linearly to 0 at `f = 1`, scaled by the
/// competition factor.
pub fn fee_and_bond_penalty(time_book_fraction: Decimal, params: &PenaltyParams) -> SlaPenalty {
    let f = time_book_fraction.max(Decimal::ZERO).min(Decimal::ONE);
    let min = params.commitment_min_time_fraction;

    if f < min {
        let bond = (params.bond_penalty_slope * (Decimal::ONE - f / min))
            .min(params.bond_penalty_max)
            .max(Decimal::ZERO);
        return SlaPenalty { fee: Decimal::ONE, bond };
    }

    let fee = if min >= Decimal::ONE {
        Decimal::ZERO
    } else {
        (Decimal::ONE - (f - min) / (Decimal::ONE - min)) * params.sla_competition_factor
    };
    SlaPenalty { fee: fee.max(Decimal::ZERO), bond: Decimal::ZERO }
}

/// Per-party compliance bookkeeping for the current epoch.
#[derive(Debug, Clone, Default)]
pub struct SlaTracker {
    performances: BTreeMap<PartyId, SlaPerformance>,
    epoch_start: Timestamp,
    hysteresis_epochs: usize,
}

impl SlaTracker {
    pub fn new(hysteresis_epochs: usize) -> Self {
        Self { performances: BTreeMap::new(), epoch_start: 0, hysteresis_epochs }
    }

    pub fn epoch_start(&self) -> Timestamp {
        self.epoch_start
    }

    pub fn hysteresis_epochs(&self) -> usize {
        self.hysteresis_epochs
    }

    /// Start tracking a party; a party already tracked keeps its history.
    pub fn track(&mut self, party: &PartyId) {
        let epochs = self.hysteresis_epochs;
        self.performances.entry(party.clone()).or_insert_with(|| SlaPerformance::new(epochs));
    }

    pub fn untrack(&mut self, party: &PartyId) -> bool {
        self.performances.remove(party).is_some()
    }

    pub fn parties(&self) -> impl Iterator<Item = &PartyId> {
        self.performances.keys()
    }

    pub fn get(&self, party: &PartyId) -> Option<&SlaPerformance> {
        self.performances.get(party)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PartyId, &SlaPerformance)> {
        self.performances.iter()
    }

    /// Record one block's observation. Only transitions move the clock.
    pub fn observe(&mut self, party: &PartyId, now: Timestamp, sample: &SlaSample) {
        let Some(perf) = self.performances.get_mut(party) else {
            return;
        };

        match (sample.meets, perf.commitment_start) {
            (true, None) => perf.commitment_start = Some(now),
            (false, Some(_)) => {
                perf.close_stretch(now);
                perf.commitment_start = None;
            }
            _ => {}
        }

        perf.stats.required_liquidity = sample.required;
        perf.stats.notional_volume_buys = sample.notional_buys;
        perf.stats.notional_volume_sells = sample.notional_sells;
    }

    /// Begin a new epoch at `now`. Parties meeting their commitment right now
    /// start a fresh compliant stretch.
    pub fn reset_epoch(&mut self, now: Timestamp, mut meets: impl FnMut(&PartyId) -> bool) {
        for (party, perf) in self.performances.iter_mut() {
            perf.elapsed_meeting_sla = 0;
            perf.commitment_start = meets(party).then_some(now);
        }
        self.epoch_start = now;
    }

    pub fn resize_hysteresis(&mut self, epochs: usize) {
        if epochs == self.hysteresis_epochs {
            return;
        }
        for perf in self.performances.values_mut() {
            perf.previous_penalties.resize(epochs);
        }
        self.hysteresis_epochs = epochs;
    }

    /// Close the epoch at `now` and turn compliant time into penalties.
    ///
    /// The fee penalty returned is the larger of this epoch's penalty and the
    /// average of the previous ones; the ring then records this epoch's raw
    /// penalty. A new epoch starts at `now`, carrying over open stretches.
    pub fn calculate_penalties(&mut self, now: Timestamp, params: &PenaltyParams) -> SlaPenalties {
        let epoch_length = now - self.epoch_start;
        let mut penalties = SlaPenalties { all_parties_have_full_fee_penalty: true, ..Default::default() };

        for (party, perf) in self.performances.iter_mut() {
            let meeting_now = perf.commitment_start.is_some();
            perf.close_stretch(now);
            if meeting_now {
                perf.commitment_start = Some(now);
            }

            let fraction = if epoch_length <= 0 {
                if meeting_now { Decimal::ONE } else { Decimal::ZERO }
            } else {
                (Decimal::from(perf.elapsed_meeting_sla) / Decimal::from(epoch_length)).min(Decimal::ONE)
            };

            let current = fee_and_bond_penalty(fraction, params);
            let fee = current.fee.max(perf.previous_average());
            perf.previous_penalties.push(current.fee);
            perf.elapsed_meeting_sla = 0;

            perf.stats.last_epoch_time_book_fraction = fraction;
            perf.stats.last_epoch_fee_penalty = fee;
            perf.stats.last_epoch_bond_penalty = current.bond;

            if fee < Decimal::ONE {
                penalties.all_parties_have_full_fee_penalty = false;
            }
            tracing::debug!(%party, %fraction, %fee, bond = %current.bond, "sla penalty");
            penalties.penalties_per_party.insert(party.clone(), SlaPenalty { fee, bond: current.bond });
        }

        self.epoch_start = now;
        penalties
    }

    pub(crate) fn restore(&mut self, epoch_start: Timestamp, performances: BTreeMap<PartyId, SlaPerformance>) {
        self.epoch_start = epoch_start;
        self.performances = performances;
    }
}
