//! Running average of normalised liquidity scores, used to weight the fee split.

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;

use crate::core::PartyId;

/// Decimal places kept in the running average
pub const SCORE_PRECISION: u32 = 10;

/// Scale scores so they sum to 1. A zero total splits evenly.
pub fn normalize_scores(current: &BTreeMap<PartyId, Decimal>) -> BTreeMap<PartyId, Decimal> {
    if current.is_empty() {
        return BTreeMap::new();
    }
    let total: Decimal = current.values().copied().sum();
    let equal = Decimal::ONE / Decimal::from(current.len() as u64);

    current
        .iter()
        .map(|(party, score)| {
            let v = if total.is_zero() { equal } else { *score / total };
            (party.clone(), v)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreTracker {
    average: BTreeMap<PartyId, Decimal>,
    /// Number of the next round to be folded in, starting at 1
    n: u64,
}

impl Default for ScoreTracker {
    fn default() -> Self {
        Self { average: BTreeMap::new(), n: 1 }
    }
}

impl ScoreTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn average(&self) -> &BTreeMap<PartyId, Decimal> {
        &self.average
    }

    pub fn running_average_counter(&self) -> u64 {
        self.n
    }

    /// Fold one round of raw scores into the average.
    ///
    /// Parties missing from `current` drop out of the average. An empty round
    /// changes nothing.
    pub fn update(&mut self, current: &BTreeMap<PartyId, Decimal>) -> bool {
        if current.is_empty() {
            return false;
        }

        let normalized = normalize_scores(current);
        let next = if self.n > 1 {
            let n = Decimal::from(self.n);
            let keep = (n - Decimal::ONE) / n;
            normalized
                .into_iter()
                .map(|(party, v)| {
                    let old = self.average.get(&party).copied().unwrap_or(Decimal::ZERO);
                    (party, old * keep + v / n)
                })
                .collect()
        } else {
            normalized
        };

        self.average = next
            .into_iter()
            .map(|(party, v)| (party, v.round_dp_with_strategy(SCORE_PRECISION, RoundingStrategy::MidpointAwayFromZero)))
            .collect();
        self.n += 1;
        true
    }

    pub fn reset(&mut self) {
        self.average.clear();
        self.n = 1;
    }

    pub(crate) fn restore(&mut self, average: BTreeMap<PartyId, Decimal>, n: u64) {
        self.average = average;
        self.n = n.max(1);
    }
}
