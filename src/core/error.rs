//! Error handling - Deterministic, hierarchical errors
//!
//! Every variant is a pure function of (state, input): the same call on the
//! same state fails the same way on every replica.

use thiserror::Error;

use crate::core::types::Side;

pub type Result<T> = std::result::Result<T, Error>;

/// Liquidity engine error hierarchy
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Submission with a zero commitment
    #[error("commitment amount is zero")]
    CommitmentAmountIsZero,

    /// Fee outside [0, max fee]
    #[error("invalid liquidity provision fee: {0}")]
    InvalidFee(String),

    /// Malformed buy or sell shape
    #[error("invalid shape: {0}")]
    InvalidShape(#[from] ShapeError),

    /// Amendment that changes nothing
    #[error("empty liquidity provision amendment content")]
    EmptyAmendment,

    #[error("party has no liquidity provision")]
    PartyHasNoLiquidityProvision,

    #[error("liquidity provision already exists")]
    LiquidityProvisionAlreadyExists,

    #[error("liquidity provision does not exist")]
    LiquidityProvisionDoesNotExist,

    /// A peg reference could not be priced
    #[error("reprice failed: {0}")]
    Reprice(String),

    /// Configuration errors
    #[error("config: {0}")]
    Config(String),

    #[error("snapshot key not recognised: {0}")]
    UnknownSnapshotKey(String),

    #[error("snapshot version {found} not supported (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },

    #[error("snapshot decode: {0}")]
    SnapshotDecode(String),

    #[error("snapshot encode: {0}")]
    SnapshotEncode(String),

    /// A sub-state was loaded before the state it depends on
    #[error("snapshot dependency: {0}")]
    SnapshotDependency(String),
}

/// Shape validation failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("empty {0} shape")]
    Empty(Side),

    #[error("{side} shape size exceeds max ({max})")]
    TooLarge { side: Side, max: usize },

    #[error("order in {0} shape without a proportion")]
    MissingProportion(Side),

    #[error("order in buy side shape with best ask price reference")]
    BuyPeggedToBestAsk,

    #[error("order in sell side shape with best bid price reference")]
    SellPeggedToBestBid,

    #[error("order in {0} shape pegged to mid must have an offset > 0")]
    ZeroMidOffset(Side),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::SnapshotEncode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::SnapshotDecode(e.to_string())
    }
}
