//! Cached probability-of-trading curves.
//!
//! A curve maps a relative distance from the touch (0 = at best bid/ask) to a
//! probability. Offsets are strictly increasing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityCurve {
    offsets: Vec<Decimal>,
    probabilities: Vec<Decimal>,
}

impl ProbabilityCurve {
    /// Points must be sorted by offset; duplicates keep the first value.
    pub fn from_points(points: impl IntoIterator<Item = (Decimal, Decimal)>) -> Self {
        let mut curve = Self::default();
        for (offset, probability) in points {
            if curve.offsets.last().is_some_and(|last| *last >= offset) {
                continue;
            }
            curve.offsets.push(offset);
            curve.probabilities.push(probability);
        }
        curve
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Exact hit, linear interpolation between neighbours, or linear
    /// extrapolation past the last point, clamped to `[min_probability, 1]`.
    pub fn lookup(&self, offset: Decimal, min_probability: Decimal) -> Decimal {
        let n = self.offsets.len();
        if n == 0 {
            return min_probability;
        }

        let raw = match self.offsets.binary_search(&offset) {
            Ok(i) => self.probabilities[i],
            Err(0) => self.probabilities[0],
            Err(i) if i == n => {
                if n == 1 {
                    self.probabilities[0]
                } else {
                    line(
                        (self.offsets[n - 2], self.probabilities[n - 2]),
                        (self.offsets[n - 1], self.probabilities[n - 1]),
                        offset,
                    )
                }
            }
            Err(i) => line(
                (self.offsets[i - 1], self.probabilities[i - 1]),
                (self.offsets[i], self.probabilities[i]),
                offset,
            ),
        };

        clamp(raw, min_probability, Decimal::ONE)
    }
}

/// Value at `x` of the line through `a` and `b`.
fn line(a: (Decimal, Decimal), b: (Decimal, Decimal), x: Decimal) -> Decimal {
    let dx = b.0 - a.0;
    if dx.is_zero() {
        return a.1;
    }
    let slope = (b.1 - a.1).checked_div(dx).unwrap_or(Decimal::ZERO);
    (x - a.0)
        .checked_mul(slope)
        .and_then(|d| d.checked_add(a.1))
        .unwrap_or(Decimal::ZERO)
}

pub(crate) fn clamp(v: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    v.max(lo).min(hi)
}

/// One curve per side, agreed through consensus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityCurves {
    pub bid: ProbabilityCurve,
    pub ask: ProbabilityCurve,
}
