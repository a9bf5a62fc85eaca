//! Core types - Strong typing for safety

use num_bigint::BigUint;
use num_traits::Zero;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Nanoseconds since the unix epoch, as handed over by the time service.
pub type Timestamp = i64;

/// Party identifier. Ordered so per-party iteration is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartyId {
    fn from(s: &str) -> Self {
        PartyId::new(s)
    }
}

impl From<String> for PartyId {
    fn from(s: String) -> Self {
        PartyId::new(s)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Anchor a shape order is pegged to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeggedReference {
    BestBid,
    BestAsk,
    Mid,
}

/// One element of a shape: peg, weight within its side and distance from the peg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityOrder {
    pub reference: PeggedReference,
    pub proportion: u32,
    pub offset: BigUint,
}

impl LiquidityOrder {
    pub fn new(reference: PeggedReference, proportion: u32, offset: impl Into<BigUint>) -> Self {
        Self { reference, proportion, offset: offset.into() }
    }
}

/// Shape element bound to the order ID it is deployed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityOrderReference {
    pub order_id: String,
    pub order: LiquidityOrder,
}

/// Provision status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityProvisionStatus {
    Pending,
    Active,
    Undeployed,
    Cancelled,
    Stopped,
    Rejected,
}

impl std::fmt::Display for LiquidityProvisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Undeployed => "UNDEPLOYED",
            Self::Cancelled => "CANCELLED",
            Self::Stopped => "STOPPED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

/// A party's commitment on one market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityProvision {
    pub id: String,
    pub party: PartyId,
    pub market_id: String,
    pub commitment_amount: BigUint,
    pub fee: Decimal,
    pub reference: String,
    pub status: LiquidityProvisionStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub version: u64,
    pub buys: Vec<LiquidityOrderReference>,
    pub sells: Vec<LiquidityOrderReference>,
}

impl LiquidityProvision {
    pub fn shape(&self, side: Side) -> &[LiquidityOrderReference] {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }

    pub fn order_ids(&self) -> impl Iterator<Item = &str> {
        self.buys.iter().chain(self.sells.iter()).map(|r| r.order_id.as_str())
    }
}

/// Transaction payload creating a commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityProvisionSubmission {
    pub market_id: String,
    pub commitment_amount: BigUint,
    pub fee: Decimal,
    pub reference: String,
    pub buys: Vec<LiquidityOrder>,
    pub sells: Vec<LiquidityOrder>,
}

/// Transaction payload amending a commitment. Absent fields are left as is;
/// a zero commitment is a request to cancel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityProvisionAmendment {
    pub market_id: String,
    pub commitment_amount: Option<BigUint>,
    pub fee: Option<Decimal>,
    pub reference: Option<String>,
    pub buys: Option<Vec<LiquidityOrder>>,
    pub sells: Option<Vec<LiquidityOrder>>,
}

impl LiquidityProvisionAmendment {
    pub fn is_empty(&self) -> bool {
        self.commitment_amount.is_none()
            && self.fee.is_none()
            && self.reference.is_none()
            && self.buys.is_none()
            && self.sells.is_none()
    }

    pub fn is_cancel(&self) -> bool {
        self.commitment_amount.as_ref().is_some_and(|c| c.is_zero())
    }
}

/// Order status, as seen from the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Parked,
    Filled,
    Cancelled,
    Stopped,
    Rejected,
}

/// Resting order, read from the order book or built for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub market_id: String,
    pub party: PartyId,
    pub side: Side,
    pub price: BigUint,
    pub size: u64,
    pub remaining: u64,
    pub status: OrderStatus,
    pub reference: String,
    pub liquidity_provision_id: Option<String>,
    pub created_at: Timestamp,
}

impl Order {
    pub fn is_liquidity_order(&self) -> bool {
        self.liquidity_provision_id.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status == OrderStatus::Active
    }

    pub fn has_traded(&self) -> bool {
        self.remaining != self.size
    }

    /// price × remaining
    pub fn notional(&self) -> BigUint {
        &self.price * BigUint::from(self.remaining)
    }
}

/// Orders of one party the book should cancel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToCancel {
    pub party: PartyId,
    pub order_ids: Vec<String>,
}

impl ToCancel {
    pub fn new(party: PartyId) -> Self {
        Self { party, order_ids: Vec::new() }
    }

    pub fn add(&mut self, order_id: impl Into<String>) {
        self.order_ids.push(order_id.into());
    }

    pub fn is_empty(&self) -> bool {
        self.order_ids.is_empty()
    }

    pub fn merge(mut self, other: ToCancel) -> Self {
        self.order_ids.extend(other.order_ids);
        self
    }
}

/// Epoch-end penalty for one party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPenalty {
    pub fee: Decimal,
    pub bond: Decimal,
}

/// Epoch-end penalties for every committed party
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPenalties {
    pub all_parties_have_full_fee_penalty: bool,
    pub penalties_per_party: BTreeMap<PartyId, SlaPenalty>,
}
