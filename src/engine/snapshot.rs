//! Snapshot state of the engine: dirty tracking, encode and restore.

use std::collections::BTreeMap;

use super::{hysteresis_len, Engine};
use crate::core::{Error, LiquidityProvision, PartyId, Result};
use crate::sla::{SlaPerformance, SliceRing};
use crate::snapshot::payload::{
    ParametersState, PerformanceEntry, PerformancesState, ProvisionsState, ScoresState, SuppliedState,
};
use crate::snapshot::{self, Payload, StateKind};

impl Engine {
    /// Snapshot keys of this market, in fixed order.
    pub fn keys(&self) -> Vec<String> {
        snapshot::keys(&self.config.market_id)
    }

    /// True if the sub-state changed since the last `get_state`.
    pub fn has_changed(&self, key: &str) -> Result<bool> {
        let kind = StateKind::from_key(key, &self.config.market_id)?;
        Ok(self.dirty.contains(&kind) || !self.cache.contains_key(&kind))
    }

    /// Encoded sub-state. Only dirty sub-states are re-encoded.
    pub fn get_state(&mut self, key: &str) -> Result<Vec<u8>> {
        let kind = StateKind::from_key(key, &self.config.market_id)?;
        self.encoded(kind).map(<[u8]>::to_vec)
    }

    /// Like `get_state`, but None if nothing changed since the last call.
    pub fn get_state_if_changed(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.has_changed(key)? {
            return Ok(None);
        }
        self.get_state(key).map(Some)
    }

    /// Hex SHA-256 of the current payload for `key`.
    pub fn state_hash(&mut self, key: &str) -> Result<String> {
        let kind = StateKind::from_key(key, &self.config.market_id)?;
        self.encoded(kind).map(snapshot::hash)
    }

    fn encoded(&mut self, kind: StateKind) -> Result<&[u8]> {
        if self.dirty.contains(&kind) || !self.cache.contains_key(&kind) {
            let data = snapshot::encode(&self.payload(kind))?;
            self.cache.insert(kind, data);
            self.dirty.remove(&kind);
        }
        self.cache
            .get(&kind)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::SnapshotEncode(format!("no cached state for {kind}")))
    }

    fn payload(&self, kind: StateKind) -> Payload {
        let market_id = self.config.market_id.clone();
        match kind {
            StateKind::Provisions => Payload::Provisions(ProvisionsState {
                market_id,
                provisions: self.provisions.values().cloned().collect(),
            }),
            StateKind::PendingProvisions => Payload::PendingProvisions(ProvisionsState {
                market_id,
                provisions: self.pending.values().cloned().collect(),
            }),
            StateKind::Performances => Payload::Performances(PerformancesState {
                market_id,
                epoch_start: self.sla.epoch_start(),
                hysteresis_epochs: self.sla.hysteresis_epochs() as u64,
                performances: self
                    .sla
                    .iter()
                    .map(|(party, perf)| PerformanceEntry {
                        party: party.clone(),
                        elapsed_meeting_sla: perf.elapsed_meeting_sla,
                        commitment_start: perf.commitment_start,
                        previous_penalties: perf.previous_penalties.to_vec(),
                        stats: perf.stats.clone(),
                    })
                    .collect(),
            }),
            StateKind::Supplied => Payload::Supplied(SuppliedState {
                market_id,
                curves: self.supplied.curves().cloned(),
            }),
            StateKind::Scores => Payload::Scores(ScoresState {
                market_id,
                running_average_counter: self.scores.running_average_counter(),
                scores: self.scores.average().iter().map(|(p, s)| (p.clone(), *s)).collect(),
            }),
            StateKind::Parameters => Payload::Parameters(ParametersState {
                market_id,
                max_fee: self.config.max_fee,
                max_shape_size: self.config.max_shape_size as u64,
                stake_to_obligation_factor: self.config.stake_to_obligation_factor,
                stake_to_ccy_volume: self.config.stake_to_ccy_volume,
                non_performance_bond_penalty_slope: self.config.non_performance_bond_penalty_slope,
                non_performance_bond_penalty_max: self.config.non_performance_bond_penalty_max,
                fee_calculation_time_step: self.config.fee_calculation_time_step,
                min_probability_of_trading: self.config.min_probability_of_trading,
                probability_of_trading_tau_scaling: self.config.probability_of_trading_tau_scaling,
                sla: self.config.sla.clone(),
                last_fee_distribution: self.last_fee_distribution,
            }),
        }
    }

    /// Restore one sub-state from a payload produced by `get_state`.
    ///
    /// Performances can only be loaded once every party they mention has
    /// its provision loaded.
    pub fn load_state(&mut self, key: &str, data: &[u8]) -> Result<()> {
        let kind = StateKind::from_key(key, &self.config.market_id)?;
        let payload = snapshot::decode(data)?;

        if payload.kind() != kind {
            return Err(Error::SnapshotDecode(format!("key {key} holds a {} payload", payload.kind())));
        }
        if payload.market_id() != self.config.market_id {
            return Err(Error::SnapshotDecode(format!(
                "payload for market {} loaded into {}",
                payload.market_id(),
                self.config.market_id
            )));
        }

        match payload {
            Payload::Provisions(s) => self.provisions = by_party(s.provisions),
            Payload::PendingProvisions(s) => self.pending = by_party(s.provisions),
            Payload::Performances(s) => self.restore_performances(s)?,
            Payload::Supplied(s) => self.supplied.restore_curves(s.curves),
            Payload::Scores(s) => self.scores.restore(s.scores.into_iter().collect(), s.running_average_counter),
            Payload::Parameters(s) => self.restore_parameters(s)?,
        }

        tracing::info!(%key, "snapshot state loaded");
        self.touch(&[kind]);
        Ok(())
    }

    fn restore_performances(&mut self, state: PerformancesState) -> Result<()> {
        if let Some(missing) = state.performances.iter().find(|p| !self.provisions.contains_key(&p.party)) {
            return Err(Error::SnapshotDependency(format!(
                "performance of {} loaded before its provision",
                missing.party
            )));
        }

        let epochs = usize::try_from(state.hysteresis_epochs)
            .map_err(|_| Error::SnapshotDecode(format!("hysteresis window {} too large", state.hysteresis_epochs)))?;
        let performances: BTreeMap<PartyId, SlaPerformance> = state
            .performances
            .into_iter()
            .map(|p| {
                let perf = SlaPerformance {
                    elapsed_meeting_sla: p.elapsed_meeting_sla,
                    commitment_start: p.commitment_start,
                    previous_penalties: SliceRing::from_entries(epochs, p.previous_penalties),
                    stats: p.stats,
                };
                (p.party, perf)
            })
            .collect();

        self.sla.restore(state.epoch_start, performances);
        self.sla.resize_hysteresis(epochs);
        Ok(())
    }

    fn restore_parameters(&mut self, s: ParametersState) -> Result<()> {
        let max_shape_size = usize::try_from(s.max_shape_size)
            .map_err(|_| Error::SnapshotDecode(format!("max shape size {} too large", s.max_shape_size)))?;

        self.config.max_fee = s.max_fee;
        self.config.max_shape_size = max_shape_size;
        self.config.stake_to_obligation_factor = s.stake_to_obligation_factor;
        self.config.stake_to_ccy_volume = s.stake_to_ccy_volume;
        self.config.non_performance_bond_penalty_slope = s.non_performance_bond_penalty_slope;
        self.config.non_performance_bond_penalty_max = s.non_performance_bond_penalty_max;
        self.config.fee_calculation_time_step = s.fee_calculation_time_step;
        self.config.min_probability_of_trading = s.min_probability_of_trading;
        self.config.probability_of_trading_tau_scaling = s.probability_of_trading_tau_scaling;
        self.supplied.on_min_probability_of_trading_update(s.min_probability_of_trading);
        self.supplied.on_probability_of_trading_tau_scaling_update(s.probability_of_trading_tau_scaling);
        self.sla.resize_hysteresis(hysteresis_len(&s.sla));
        self.config.sla = s.sla;
        self.last_fee_distribution = s.last_fee_distribution;
        Ok(())
    }
}

fn by_party(provisions: Vec<LiquidityProvision>) -> BTreeMap<PartyId, LiquidityProvision> {
    provisions.into_iter().map(|lp| (lp.party.clone(), lp)).collect()
}
