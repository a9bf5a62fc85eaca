//! Domain events emitted through the broker.

use serde::{Deserialize, Serialize};

use crate::core::types::{LiquidityProvision, PartyId};
use crate::sla::SlaStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Any status or content change of a provision, including rejections.
    LiquidityProvision(LiquidityProvision),
    /// Per-party SLA outcome, sent once per epoch.
    SlaPerformance { party: PartyId, stats: SlaStats },
}

impl Event {
    pub fn party(&self) -> &PartyId {
        match self {
            Event::LiquidityProvision(lp) => &lp.party,
            Event::SlaPerformance { party, .. } => party,
        }
    }
}
