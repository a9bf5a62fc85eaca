//! Provision lifecycle: submit, amend, cancel/stop/reject and the epoch-start
//! application of pending entries.

use num_traits::Zero;
use std::collections::BTreeMap;

use super::Engine;
use crate::core::{
    Error, IdGen, LiquidityOrder, LiquidityOrderReference, LiquidityProvision, LiquidityProvisionAmendment,
    LiquidityProvisionStatus, LiquidityProvisionSubmission, PartyId, PeggedReference, Result, ShapeError, Side,
    Timestamp, ToCancel,
};
use crate::snapshot::StateKind;

/// Check one side of a shape: size bounds, proportions and side-consistent pegs.
pub fn validate_shape(shape: &[LiquidityOrder], side: Side, max_size: usize) -> std::result::Result<(), ShapeError> {
    if shape.is_empty() {
        return Err(ShapeError::Empty(side));
    }
    if shape.len() > max_size {
        return Err(ShapeError::TooLarge { side, max: max_size });
    }

    for lo in shape {
        if lo.proportion == 0 {
            return Err(ShapeError::MissingProportion(side));
        }
        match (side, lo.reference) {
            (Side::Buy, PeggedReference::BestAsk) => return Err(ShapeError::BuyPeggedToBestAsk),
            (Side::Sell, PeggedReference::BestBid) => return Err(ShapeError::SellPeggedToBestBid),
            (_, PeggedReference::Mid) if lo.offset.is_zero() => return Err(ShapeError::ZeroMidOffset(side)),
            _ => {}
        }
    }
    Ok(())
}

fn bind_shape(shape: Vec<LiquidityOrder>, id_gen: &mut dyn IdGen) -> Vec<LiquidityOrderReference> {
    shape
        .into_iter()
        .map(|order| LiquidityOrderReference { order_id: id_gen.next_id(), order })
        .collect()
}

impl Engine {
    fn validate_fee(&self, fee: rust_decimal::Decimal) -> Result<()> {
        if fee.is_sign_negative() || fee > self.config.max_fee {
            return Err(Error::InvalidFee(format!("{fee} not within [0, {}]", self.config.max_fee)));
        }
        Ok(())
    }

    pub fn validate_submission(&self, sub: &LiquidityProvisionSubmission) -> Result<()> {
        if sub.commitment_amount.is_zero() {
            return Err(Error::CommitmentAmountIsZero);
        }
        self.validate_fee(sub.fee)?;
        validate_shape(&sub.buys, Side::Buy, self.config.max_shape_size)?;
        validate_shape(&sub.sells, Side::Sell, self.config.max_shape_size)?;
        Ok(())
    }

    /// A zero commitment is a cancel request and needs no further checks.
    pub fn validate_amendment(&self, amendment: &LiquidityProvisionAmendment) -> Result<()> {
        if amendment.is_empty() {
            return Err(Error::EmptyAmendment);
        }
        if amendment.is_cancel() {
            return Ok(());
        }
        if let Some(fee) = amendment.fee {
            self.validate_fee(fee)?;
        }
        if let Some(buys) = &amendment.buys {
            validate_shape(buys, Side::Buy, self.config.max_shape_size)?;
        }
        if let Some(sells) = &amendment.sells {
            validate_shape(sells, Side::Sell, self.config.max_shape_size)?;
        }
        Ok(())
    }

    /// Submit a new commitment.
    ///
    /// Returns `true` when the provision became Active right away (opening
    /// auction) and `false` when it was queued for the next epoch.
    pub fn submit(
        &mut self,
        sub: LiquidityProvisionSubmission,
        party: &PartyId,
        id_gen: &mut dyn IdGen,
    ) -> Result<bool> {
        let now = self.time.now();

        if let Err(err) = self.validate_submission(&sub) {
            tracing::debug!(%party, error = %err, "liquidity provision submission rejected");
            let rejected = LiquidityProvision {
                id: id_gen.next_id(),
                party: party.clone(),
                market_id: sub.market_id,
                commitment_amount: sub.commitment_amount,
                fee: sub.fee,
                reference: sub.reference,
                status: LiquidityProvisionStatus::Rejected,
                created_at: now,
                updated_at: now,
                version: 0,
                buys: Vec::new(),
                sells: Vec::new(),
            };
            self.send(&rejected);
            return Err(err);
        }

        if self.is_liquidity_provider(party) {
            return Err(Error::LiquidityProvisionAlreadyExists);
        }

        let mut lp = LiquidityProvision {
            id: id_gen.next_id(),
            party: party.clone(),
            market_id: sub.market_id,
            commitment_amount: sub.commitment_amount,
            fee: sub.fee,
            reference: sub.reference,
            status: LiquidityProvisionStatus::Pending,
            created_at: now,
            updated_at: now,
            version: 1,
            buys: bind_shape(sub.buys, id_gen),
            sells: bind_shape(sub.sells, id_gen),
        };

        if self.auction.is_opening_auction() {
            lp.status = LiquidityProvisionStatus::Active;
            tracing::debug!(%party, id = %lp.id, commitment = %lp.commitment_amount, "liquidity provision active");
            self.send(&lp);
            self.provisions.insert(party.clone(), lp);
            self.sla.track(party);
            self.touch(&[StateKind::Provisions, StateKind::Performances]);
            return Ok(true);
        }

        tracing::debug!(%party, id = %lp.id, commitment = %lp.commitment_amount, "liquidity provision pending");
        self.send(&lp);
        self.pending.insert(party.clone(), lp);
        self.touch(&[StateKind::PendingProvisions]);
        Ok(false)
    }

    /// Amend a party's commitment in place.
    ///
    /// A pending entry, if any, is what gets amended. A zero commitment is a
    /// cancel request: applied immediately during the opening auction,
    /// otherwise queued for the next epoch start. Returns the resting orders
    /// left behind by replaced shape elements (or by an immediate cancel).
    pub fn amend(
        &mut self,
        amendment: LiquidityProvisionAmendment,
        party: &PartyId,
        id_gen: &mut dyn IdGen,
    ) -> Result<ToCancel> {
        let current = self
            .pending
            .get(party)
            .or_else(|| self.provisions.get(party))
            .cloned()
            .ok_or(Error::PartyHasNoLiquidityProvision)?;

        if let Err(err) = self.validate_amendment(&amendment) {
            tracing::debug!(%party, error = %err, "liquidity provision amendment rejected");
            let mut rejected = current;
            rejected.status = LiquidityProvisionStatus::Rejected;
            rejected.updated_at = self.time.now();
            self.send(&rejected);
            return Err(err);
        }

        if amendment.is_cancel() {
            return self.cancel_by_amendment(current, party);
        }

        let now = self.time.now();
        let mut lp = current;
        let mut to_cancel = ToCancel::new(party.clone());

        if let Some(commitment) = amendment.commitment_amount {
            lp.commitment_amount = commitment;
        }
        if let Some(fee) = amendment.fee {
            lp.fee = fee;
        }
        if let Some(reference) = amendment.reference {
            lp.reference = reference;
        }
        if let Some(buys) = amendment.buys {
            let old = std::mem::replace(&mut lp.buys, bind_shape(buys, id_gen));
            for r in old {
                to_cancel.add(r.order_id);
            }
        }
        if let Some(sells) = amendment.sells {
            let old = std::mem::replace(&mut lp.sells, bind_shape(sells, id_gen));
            for r in old {
                to_cancel.add(r.order_id);
            }
        }

        if lp.status == LiquidityProvisionStatus::Active {
            lp.status = LiquidityProvisionStatus::Undeployed;
        }
        lp.version += 1;
        lp.updated_at = now;

        tracing::debug!(%party, version = lp.version, status = %lp.status, "liquidity provision amended");
        self.send(&lp);

        let to_cancel = self.resting_only(to_cancel);
        if self.pending.contains_key(party) {
            self.pending.insert(party.clone(), lp);
            self.touch(&[StateKind::PendingProvisions]);
        } else {
            self.provisions.insert(party.clone(), lp);
            self.touch(&[StateKind::Provisions]);
        }
        Ok(to_cancel)
    }

    fn cancel_by_amendment(&mut self, current: LiquidityProvision, party: &PartyId) -> Result<ToCancel> {
        if self.auction.is_opening_auction() {
            return self.cancel(party);
        }

        let mut lp = current;
        lp.commitment_amount = Default::default();
        lp.version += 1;
        lp.updated_at = self.time.now();
        lp.status = LiquidityProvisionStatus::Pending;

        tracing::debug!(%party, "liquidity provision cancellation queued");
        self.pending.insert(party.clone(), lp);
        self.touch(&[StateKind::PendingProvisions]);
        Ok(ToCancel::new(party.clone()))
    }

    pub fn cancel(&mut self, party: &PartyId) -> Result<ToCancel> {
        self.stop_provision(party, LiquidityProvisionStatus::Cancelled)
    }

    pub fn stop(&mut self, party: &PartyId) -> Result<ToCancel> {
        self.stop_provision(party, LiquidityProvisionStatus::Stopped)
    }

    pub fn reject(&mut self, party: &PartyId) -> Result<ToCancel> {
        self.stop_provision(party, LiquidityProvisionStatus::Rejected)
    }

    fn stop_provision(&mut self, party: &PartyId, status: LiquidityProvisionStatus) -> Result<ToCancel> {
        let mut lp = self
            .provisions
            .get(party)
            .or_else(|| self.pending.get(party))
            .cloned()
            .ok_or(Error::PartyHasNoLiquidityProvision)?;

        let to_cancel = self.liquidity_orders_to_cancel(party);

        lp.status = status;
        lp.updated_at = self.time.now();
        tracing::debug!(%party, %status, orders = to_cancel.order_ids.len(), "liquidity provision terminated");
        self.send(&lp);

        self.destroy_provision(party);
        Ok(to_cancel)
    }

    pub(super) fn destroy_provision(&mut self, party: &PartyId) {
        self.provisions.remove(party);
        self.pending.remove(party);
        self.sla.untrack(party);
        self.touch(&[StateKind::Provisions, StateKind::PendingProvisions, StateKind::Performances]);
    }

    /// The party's resting liquidity orders, sorted by order ID.
    pub fn liquidity_orders_to_cancel(&self, party: &PartyId) -> ToCancel {
        let mut ids: Vec<String> = self
            .order_book
            .orders_per_party(party)
            .into_iter()
            .filter(|o| o.is_liquidity_order() && o.is_active() && o.remaining > 0)
            .map(|o| o.id)
            .collect();
        ids.sort();
        ToCancel { party: party.clone(), order_ids: ids }
    }

    /// Keep only IDs still resting on the book.
    fn resting_only(&self, mut to_cancel: ToCancel) -> ToCancel {
        if to_cancel.is_empty() {
            return to_cancel;
        }
        let resting = self.liquidity_orders_to_cancel(&to_cancel.party);
        to_cancel.order_ids.retain(|id| resting.order_ids.binary_search(id).is_ok());
        to_cancel.order_ids.sort();
        to_cancel
    }

    /// Move every pending entry into the authoritative map. Runs at epoch
    /// start and never during the opening auction.
    ///
    /// A zero commitment ends the party's provision (status Stopped). The
    /// caller cancels its remaining orders via `liquidity_orders_to_cancel`.
    pub fn apply_pending_provisions(&mut self, now: Timestamp) -> BTreeMap<PartyId, LiquidityProvision> {
        if self.auction.is_opening_auction() || self.pending.is_empty() {
            return BTreeMap::new();
        }

        let pending = std::mem::take(&mut self.pending);
        let mut applied = BTreeMap::new();

        for (party, mut lp) in pending {
            lp.updated_at = now;
            if lp.commitment_amount.is_zero() {
                lp.status = LiquidityProvisionStatus::Stopped;
                self.destroy_provision(&party);
            } else {
                lp.status = LiquidityProvisionStatus::Active;
                self.provisions.insert(party.clone(), lp.clone());
                self.sla.track(&party);
            }
            tracing::debug!(%party, status = %lp.status, "pending liquidity provision applied");
            self.send(&lp);
            applied.insert(party, lp);
        }

        self.touch(&[StateKind::Provisions, StateKind::PendingProvisions, StateKind::Performances]);
        applied
    }

    /// Keep the commitment in sync with the bond account.
    pub fn update_party_commitment(
        &mut self,
        party: &PartyId,
        commitment: num_bigint::BigUint,
    ) -> Result<LiquidityProvision> {
        let lp = self.provisions.get_mut(party).ok_or(Error::LiquidityProvisionDoesNotExist)?;
        lp.commitment_amount = commitment;
        let lp = lp.clone();
        self.touch(&[StateKind::Provisions]);
        Ok(lp)
    }
}
