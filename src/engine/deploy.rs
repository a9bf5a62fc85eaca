//! Shape deployment: reprice every provision's shape and diff it against the
//! orders resting on the book.

use num_bigint::BigUint;
use num_traits::Zero;
use std::collections::BTreeMap;

use super::Engine;
use crate::core::{
    LiquidityOrderReference, LiquidityProvision, LiquidityProvisionStatus, Order, OrderStatus, PartyId,
    PeggedReference, Result, Side, ToCancel,
};
use crate::events::Event;
use crate::snapshot::StateKind;
use crate::supplied::ShapeOrder;

impl Engine {
    /// Reprice and resize every provision's shape.
    ///
    /// `reprice` turns a peg and offset into a price; a failure on any
    /// element undeploys the whole provision and cancels its resting shape
    /// orders. Returns the orders to create and, per party, the orders to
    /// cancel. An order whose price and size are unchanged and which has not
    /// traded is left alone.
    pub fn update<F>(&mut self, min_lp_price: &BigUint, max_lp_price: &BigUint, reprice: F) -> (Vec<Order>, Vec<ToCancel>)
    where
        F: Fn(Side, PeggedReference, &BigUint) -> Result<BigUint>,
    {
        let parties: Vec<PartyId> = self.provisions.keys().cloned().collect();
        let mut creates = Vec::new();
        let mut cancels = Vec::new();

        for party in parties {
            let (c, x) = self.create_or_update_for_party(&party, min_lp_price, max_lp_price, &reprice);
            creates.extend(c);
            if !x.is_empty() {
                cancels.push(x);
            }
        }
        (creates, cancels)
    }

    fn create_or_update_for_party<F>(
        &mut self,
        party: &PartyId,
        min_lp_price: &BigUint,
        max_lp_price: &BigUint,
        reprice: &F,
    ) -> (Vec<Order>, ToCancel)
    where
        F: Fn(Side, PeggedReference, &BigUint) -> Result<BigUint>,
    {
        let Some(lp) = self.provisions.get(party).cloned() else {
            return (Vec::new(), ToCancel::new(party.clone()));
        };

        let mut failed = false;
        let mut price_shape = |side: Side, refs: &[LiquidityOrderReference]| -> Vec<ShapeOrder> {
            refs.iter()
                .map(|r| {
                    let mut o = ShapeOrder::new(r.order_id.clone(), r.order.clone());
                    match reprice(side, r.order.reference, &r.order.offset) {
                        Ok(price) => o.price = Some(price),
                        Err(err) => {
                            tracing::debug!(%party, %side, error = %err, "could not price shape order");
                            failed = true;
                        }
                    }
                    o
                })
                .collect()
        };
        let mut buys = price_shape(Side::Buy, &lp.buys);
        let mut sells = price_shape(Side::Sell, &lp.sells);

        let book: BTreeMap<String, Order> =
            self.order_book.orders_per_party(party).into_iter().map(|o| (o.id.clone(), o)).collect();

        let (creates, to_cancel, status) = if failed {
            let cancels = cancel_shape(party, &buys, &book).merge(cancel_shape(party, &sells, &book));
            let status = match lp.status {
                LiquidityProvisionStatus::Active => LiquidityProvisionStatus::Undeployed,
                other => other,
            };
            (Vec::new(), cancels, status)
        } else {
            let resting: Vec<Order> =
                book.values().filter(|o| !o.is_liquidity_order() && o.is_active()).cloned().collect();
            let obligation = self.obligation(&lp.commitment_amount);
            self.supplied.calculate_liquidity_implied_volumes(
                &obligation,
                &resting,
                min_lp_price,
                max_lp_price,
                &mut buys,
                &mut sells,
            );

            let now = self.time.now();
            let (mut creates, buy_cancels) = diff_shape(&lp, Side::Buy, &buys, &book, now);
            let (sell_creates, sell_cancels) = diff_shape(&lp, Side::Sell, &sells, &book, now);
            creates.extend(sell_creates);
            (creates, buy_cancels.merge(sell_cancels), LiquidityProvisionStatus::Active)
        };

        if status != lp.status {
            let mut lp = lp;
            lp.status = status;
            tracing::debug!(%party, %status, "liquidity provision deployment changed");
            self.send(&lp);
            self.provisions.insert(party.clone(), lp);
            self.touch(&[StateKind::Provisions]);
        }

        (creates, to_cancel)
    }

    /// Pull every deployed provision off the book, e.g. when a peg
    /// reference disappears for the whole market.
    pub fn undeploy_all(&mut self) -> Vec<ToCancel> {
        let mut cancels = Vec::new();
        let mut events = Vec::new();

        for lp in self.provisions.values_mut() {
            if lp.status != LiquidityProvisionStatus::Active {
                continue;
            }
            let book: BTreeMap<String, Order> =
                self.order_book.orders_per_party(&lp.party).into_iter().map(|o| (o.id.clone(), o)).collect();
            let mut to_cancel = ToCancel::new(lp.party.clone());
            for r in lp.buys.iter().chain(lp.sells.iter()) {
                if book.get(&r.order_id).is_some_and(|o| o.remaining != 0) {
                    to_cancel.add(r.order_id.clone());
                }
            }
            if !to_cancel.is_empty() {
                cancels.push(to_cancel);
            }

            lp.status = LiquidityProvisionStatus::Undeployed;
            events.push(Event::LiquidityProvision(lp.clone()));
        }

        if !events.is_empty() {
            tracing::debug!(count = events.len(), "liquidity provisions undeployed");
            self.broker.send_batch(events);
            self.touch(&[StateKind::Provisions]);
        }
        cancels
    }
}

fn cancel_shape(party: &PartyId, shape: &[ShapeOrder], book: &BTreeMap<String, Order>) -> ToCancel {
    let mut to_cancel = ToCancel::new(party.clone());
    for o in shape {
        if book.get(&o.order_id).is_some_and(|b| b.remaining != 0) {
            to_cancel.add(o.order_id.clone());
        }
    }
    to_cancel
}

fn diff_shape(
    lp: &LiquidityProvision,
    side: Side,
    shape: &[ShapeOrder],
    book: &BTreeMap<String, Order>,
    now: crate::core::Timestamp,
) -> (Vec<Order>, ToCancel) {
    let mut creates = Vec::new();
    let mut to_cancel = ToCancel::new(lp.party.clone());

    for o in shape {
        let Some(price) = o.price.as_ref().filter(|p| !p.is_zero()) else {
            continue;
        };
        let existing = book.get(&o.order_id);
        let unchanged = existing.is_some_and(|b| !b.has_traded() && b.size == o.implied_volume && b.price == *price);
        if unchanged {
            continue;
        }
        if let Some(b) = existing {
            if b.remaining != 0 {
                to_cancel.add(b.id.clone());
            }
        }
        if o.implied_volume == 0 {
            continue;
        }

        creates.push(Order {
            id: o.order_id.clone(),
            market_id: lp.market_id.clone(),
            party: lp.party.clone(),
            side,
            price: price.clone(),
            size: o.implied_volume,
            remaining: o.implied_volume,
            status: OrderStatus::Active,
            reference: lp.reference.clone(),
            liquidity_provision_id: Some(lp.id.clone()),
            created_at: now,
        });
    }
    (creates, to_cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;
    use crate::core::EngineConfig;
    use crate::engine::tests::{submission, test_engine, test_engine_with, TestEngine};
    use rust_decimal::Decimal;

    const BEST_BID: u64 = 99;
    const BEST_ASK: u64 = 101;

    fn reprice(side: Side, reference: PeggedReference, offset: &BigUint) -> Result<BigUint> {
        let (bid, ask) = (BigUint::from(BEST_BID), BigUint::from(BEST_ASK));
        let base = match reference {
            PeggedReference::BestBid => bid,
            PeggedReference::BestAsk => ask,
            PeggedReference::Mid => (bid + ask) / 2u32,
        };
        Ok(match side {
            Side::Buy => base - offset,
            Side::Sell => base + offset,
        })
    }

    fn no_price(_: Side, _: PeggedReference, _: &BigUint) -> Result<BigUint> {
        Err(Error::Reprice("no best bid".into()))
    }

    fn active_engine(commitment: u64) -> (TestEngine, PartyId) {
        let mut te = test_engine();
        te.auction.set_opening_auction(true);
        let party = PartyId::from("p1");
        te.engine.submit(submission(commitment), &party, &mut te.ids).unwrap();
        te.auction.set_opening_auction(false);
        (te, party)
    }

    fn band() -> (BigUint, BigUint) {
        (BigUint::from(50u32), BigUint::from(150u32))
    }

    #[test]
    fn test_update_creates_shape_orders() {
        let (mut te, party) = active_engine(3000);
        let (min, max) = band();
        let (creates, cancels) = te.engine.update(&min, &max, reprice);

        assert!(cancels.is_empty());
        assert_eq!(creates.len(), 3);
        let lp = te.engine.provision_by_party(&party).unwrap();
        let ids: Vec<&str> = creates.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, lp.order_ids().collect::<Vec<_>>());

        // buys: 97 (prop 1) and 99 (prop 2); 3000/3 = 1000 -> ceil(1000/97) = 11, 2000/99 -> 21
        assert_eq!((creates[0].price.clone(), creates[0].size), (BigUint::from(97u32), 11));
        assert_eq!((creates[1].price.clone(), creates[1].size), (BigUint::from(99u32), 21));
        // sell: 103, 3000/103 -> 30
        assert_eq!((creates[2].price.clone(), creates[2].size), (BigUint::from(103u32), 30));
        assert!(creates.iter().all(|o| o.liquidity_provision_id.as_deref() == Some(lp.id.as_str())));
    }

    #[test]
    fn test_update_sizes_huge_commitment_exactly() {
        let config = EngineConfig { stake_to_obligation_factor: Decimal::TWO, ..EngineConfig::default() };
        let mut te = test_engine_with(config);
        te.auction.set_opening_auction(true);
        let party = PartyId::from("whale");
        let mut sub = submission(1);
        sub.commitment_amount = BigUint::from(10u32).pow(30);
        te.engine.submit(sub, &party, &mut te.ids).unwrap();
        te.auction.set_opening_auction(false);

        let bid = BigUint::from(10u32).pow(20);
        let reprice = |side: Side, reference: PeggedReference, offset: &BigUint| -> Result<BigUint> {
            let base = match reference {
                PeggedReference::BestBid => bid.clone(),
                PeggedReference::BestAsk => &bid + 2u32,
                PeggedReference::Mid => &bid + 1u32,
            };
            Ok(match side {
                Side::Buy => base - offset,
                Side::Sell => base + offset,
            })
        };
        let (creates, cancels) = te.engine.update(&BigUint::from(1u32), &BigUint::from(10u32).pow(21), reprice);
        assert!(cancels.is_empty());
        assert_eq!(creates.len(), 3);

        let obligation = BigUint::from(2u32) * BigUint::from(10u32).pow(30);
        for side in [Side::Buy, Side::Sell] {
            let orders: Vec<&Order> = creates.iter().filter(|o| o.side == side).collect();
            let notional: BigUint = orders.iter().map(|o| o.notional()).sum();
            let rounding: BigUint = orders.iter().map(|o| o.price.clone()).sum();
            assert!(notional >= obligation, "{side} supplies {notional}");
            assert!(notional < &obligation + rounding, "{side} oversized: {notional}");
        }
    }

    #[test]
    fn test_update_keeps_untouched_orders() {
        let (mut te, _) = active_engine(3000);
        let (min, max) = band();
        let (creates, _) = te.engine.update(&min, &max, reprice);
        te.book.apply(creates, Vec::new());

        let (creates, cancels) = te.engine.update(&min, &max, reprice);
        assert!(creates.is_empty());
        assert!(cancels.is_empty());
    }

    #[test]
    fn test_update_replaces_traded_order_under_same_id() {
        let (mut te, party) = active_engine(3000);
        let (min, max) = band();
        let (creates, _) = te.engine.update(&min, &max, reprice);
        let traded_id = creates[2].id.clone();
        te.book.apply(creates, Vec::new());
        te.book.fill(&party, &traded_id, 5);

        let (creates, cancels) = te.engine.update(&min, &max, reprice);
        assert_eq!(cancels.len(), 1);
        assert_eq!(cancels[0].order_ids, vec![traded_id.clone()]);
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].id, traded_id);
        assert_eq!(creates[0].size, 30);
    }

    #[test]
    fn test_reprice_failure_undeploys_and_cancels() {
        let (mut te, party) = active_engine(3000);
        let (min, max) = band();
        let (creates, _) = te.engine.update(&min, &max, reprice);
        te.book.apply(creates, Vec::new());

        let (creates, cancels) = te.engine.update(&min, &max, no_price);
        assert!(creates.is_empty());
        assert_eq!(cancels.len(), 1);
        assert_eq!(cancels[0].order_ids.len(), 3);
        assert_eq!(te.engine.provision_by_party(&party).unwrap().status, LiquidityProvisionStatus::Undeployed);

        // prices are back: redeployed and active again
        te.book.apply(Vec::new(), cancels);
        let (creates, _) = te.engine.update(&min, &max, reprice);
        assert_eq!(creates.len(), 3);
        assert_eq!(te.engine.provision_by_party(&party).unwrap().status, LiquidityProvisionStatus::Active);
    }

    #[test]
    fn test_undeploy_all() {
        let (mut te, party) = active_engine(3000);
        let (min, max) = band();
        let (creates, _) = te.engine.update(&min, &max, reprice);
        te.book.apply(creates, Vec::new());

        let cancels = te.engine.undeploy_all();
        assert_eq!(cancels.len(), 1);
        assert_eq!(cancels[0].order_ids.len(), 3);
        assert_eq!(te.engine.provision_by_party(&party).unwrap().status, LiquidityProvisionStatus::Undeployed);
        // nothing left to undeploy
        assert!(te.engine.undeploy_all().is_empty());
    }

    #[test]
    fn test_resting_limit_orders_shrink_shape() {
        let (mut te, party) = active_engine(3000);
        te.book.add(Order {
            id: "own-limit".into(),
            market_id: "market-id".into(),
            party: party.clone(),
            side: Side::Sell,
            price: BigUint::from(120u32),
            size: 25,
            remaining: 25,
            status: OrderStatus::Active,
            reference: String::new(),
            liquidity_provision_id: None,
            created_at: 0,
        });
        let (min, max) = band();
        let (creates, _) = te.engine.update(&min, &max, reprice);
        // 3000 - 120*25 = 0 left on the sell side
        assert_eq!(creates.iter().filter(|o| o.side == Side::Sell).count(), 0);
        assert_eq!(creates.iter().filter(|o| o.side == Side::Buy).count(), 2);
    }
}
