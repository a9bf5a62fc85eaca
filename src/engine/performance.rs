//! Per-block SLA sampling, epoch-end penalties and liquidity scores.

use num_bigint::BigUint;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::Engine;
use crate::core::{LiquidityProvisionStatus, Order, PartyId, Side, SlaPenalties, Timestamp};
use crate::events::Event;
use crate::num::{decimal_fraction, uint_times_decimal, uint_to_decimal};
use crate::sla::SlaSample;
use crate::snapshot::StateKind;

impl Engine {
    /// Price band within which resting orders count toward the SLA.
    ///
    /// In auction the band spans the last traded and indicative prices,
    /// otherwise it is centred on the mid. None when no reference exists.
    pub fn sla_price_band(&self) -> Option<(Decimal, Decimal)> {
        let range = self.config.sla.price_range;
        let (low, high) = if self.auction.in_auction() {
            let last = self.order_book.last_traded_price();
            let indicative = self.order_book.indicative_price();
            let (lo, hi) = match (last, indicative) {
                (Some(a), Some(b)) => (a.clone().min(b.clone()), a.max(b)),
                (Some(p), None) | (None, Some(p)) => (p.clone(), p),
                (None, None) => return None,
            };
            (uint_to_decimal(&lo), uint_to_decimal(&hi))
        } else {
            let mid = self.mid_price()?;
            (mid, mid)
        };
        Some((scale(low, Decimal::ONE - range), scale(high, Decimal::ONE + range)))
    }

    fn mid_price(&self) -> Option<Decimal> {
        let bid = self.order_book.best_static_bid_price()?;
        let ask = self.order_book.best_static_ask_price()?;
        let mid = uint_to_decimal(&(bid + ask)) / Decimal::TWO;
        (mid > Decimal::ZERO).then_some(mid)
    }

    fn sla_sample(&self, party: &PartyId, band: Option<(Decimal, Decimal)>) -> SlaSample {
        let commitment = self.provisions.get(party).map(|lp| lp.commitment_amount.clone()).unwrap_or_default();
        let required = uint_times_decimal(&commitment, self.config.stake_to_ccy_volume);

        let Some((min, max)) = band else {
            return SlaSample::unpriced(required);
        };

        let orders = self.order_book.orders_per_party(party);
        let buys = notional_in_band(&orders, Side::Buy, min, max);
        let sells = notional_in_band(&orders, Side::Sell, min, max);
        let meets = self.covers(&buys, &commitment) && self.covers(&sells, &commitment);

        let position_factor = self.config.position_factor;
        let volume = |n: &BigUint| uint_to_decimal(n).checked_div(position_factor).unwrap_or(Decimal::MAX);
        SlaSample { required, notional_buys: volume(&buys), notional_sells: volume(&sells), meets }
    }

    /// `notional / position_factor >= commitment × stake_to_ccy_volume`, in
    /// exact integer arithmetic.
    fn covers(&self, notional: &BigUint, commitment: &BigUint) -> bool {
        let (pf_num, pf_den) = decimal_fraction(self.config.position_factor);
        let (stake_num, stake_den) = decimal_fraction(self.config.stake_to_ccy_volume);
        notional * pf_den * stake_den >= commitment * stake_num * pf_num
    }

    fn sla_samples(&self) -> BTreeMap<PartyId, SlaSample> {
        let band = self.sla_price_band();
        self.sla.parties().map(|p| (p.clone(), self.sla_sample(p, band))).collect()
    }

    /// Sample every tracked provider at the end of a block.
    pub fn end_block(&mut self) {
        let now = self.time.now();
        let samples = self.sla_samples();
        for (party, sample) in &samples {
            self.sla.observe(party, now, sample);
        }
        if !samples.is_empty() {
            self.touch(&[StateKind::Performances]);
        }
    }

    /// Start a new SLA epoch at `now`.
    pub fn reset_sla_epoch(&mut self, now: Timestamp) {
        let samples = self.sla_samples();
        self.sla.reset_epoch(now, |party| samples.get(party).is_some_and(|s| s.meets));
        self.touch(&[StateKind::Performances]);
    }

    /// Close the epoch at `now` and emit every provider's SLA figures.
    pub fn calculate_sla_penalties(&mut self, now: Timestamp) -> SlaPenalties {
        let params = self.penalty_params();
        let penalties = self.sla.calculate_penalties(now, &params);

        let events: Vec<Event> = self
            .sla
            .iter()
            .map(|(party, perf)| Event::SlaPerformance { party: party.clone(), stats: perf.stats.clone() })
            .collect();
        if !events.is_empty() {
            self.broker.send_batch(events);
        }

        self.touch(&[StateKind::Performances]);
        penalties
    }

    /// Raw liquidity score of every Active provider, and their total.
    pub fn current_liquidity_scores(
        &self,
        best_bid: Decimal,
        best_ask: Decimal,
        min_lp_price: &BigUint,
        max_lp_price: &BigUint,
    ) -> (BTreeMap<PartyId, Decimal>, Decimal) {
        let (min, max) = (uint_to_decimal(min_lp_price), uint_to_decimal(max_lp_price));
        let mut total = Decimal::ZERO;
        let mut scores = BTreeMap::new();

        for lp in self.provisions.values().filter(|lp| lp.status == LiquidityProvisionStatus::Active) {
            let orders: Vec<Order> =
                self.order_book.orders_per_party(&lp.party).into_iter().filter(Order::is_active).collect();
            let score = self.supplied.calculate_liquidity_score(&orders, best_bid, best_ask, min, max);
            total += score;
            scores.insert(lp.party.clone(), score);
        }
        (scores, total)
    }

    pub fn update_average_liquidity_scores(
        &mut self,
        best_bid: Decimal,
        best_ask: Decimal,
        min_lp_price: &BigUint,
        max_lp_price: &BigUint,
    ) {
        let (current, _) = self.current_liquidity_scores(best_bid, best_ask, min_lp_price, max_lp_price);
        if self.scores.update(&current) {
            self.touch(&[StateKind::Scores]);
        }
    }

    pub fn reset_average_liquidity_scores(&mut self) {
        self.scores.reset();
        self.touch(&[StateKind::Scores]);
    }
}

fn notional_in_band(orders: &[Order], side: Side, min: Decimal, max: Decimal) -> BigUint {
    orders
        .iter()
        .filter(|o| o.side == side && o.is_active())
        .filter(|o| {
            let price = uint_to_decimal(&o.price);
            price >= min && price <= max
        })
        .map(Order::notional)
        .sum()
}

fn scale(v: Decimal, factor: Decimal) -> Decimal {
    v.checked_mul(factor).unwrap_or(Decimal::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EngineConfig, OrderStatus, SlaParams};
    use crate::engine::tests::{submission, test_engine_with, TestEngine};

    const SEC: i64 = 1_000_000_000;
    const SHAPE: [u64; 7] = [15, 15, 17, 18, 12, 12, 12];

    fn config(sla: SlaParams) -> EngineConfig {
        EngineConfig {
            non_performance_bond_penalty_slope: Decimal::TWO,
            non_performance_bond_penalty_max: Decimal::new(5, 1),
            sla,
            ..EngineConfig::default()
        }
    }

    fn sla(min: i64, comp: i64, epochs: u64) -> SlaParams {
        SlaParams {
            price_range: Decimal::new(2, 1),
            commitment_min_time_fraction: Decimal::new(min, 1),
            sla_competition_factor: Decimal::new(comp, 1),
            performance_hysteresis_epochs: epochs,
        }
    }

    fn orders(party: &PartyId, on_book: bool) -> Vec<Order> {
        if !on_book {
            return Vec::new();
        }
        let mut out = Vec::new();
        for side in [Side::Buy, Side::Sell] {
            for (i, price) in SHAPE.iter().enumerate() {
                out.push(Order {
                    id: format!("{side}-{i}"),
                    market_id: "market-id".into(),
                    party: party.clone(),
                    side,
                    price: BigUint::from(*price),
                    size: *price,
                    remaining: *price,
                    status: OrderStatus::Active,
                    reference: String::new(),
                    liquidity_provision_id: None,
                    created_at: 0,
                });
            }
        }
        out
    }

    fn setup(cfg: EngineConfig, in_auction: bool) -> (TestEngine, PartyId) {
        let mut te = test_engine_with(cfg);
        let party = PartyId::from("lp-party-1");
        te.engine.submit(submission(100), &party, &mut te.ids).unwrap();
        te.auction.set_in_auction(in_auction);
        te.book.set_prices(Some(15), Some(15), Some(15), Some(15));
        (te, party)
    }

    /// One block per second from `start`, penalties at the end of the epoch.
    fn run_epoch(te: &mut TestEngine, party: &PartyId, start: Timestamp, blocks: &[bool]) -> crate::core::SlaPenalty {
        te.engine.reset_sla_epoch(start);
        te.engine.apply_pending_provisions(start);
        for (i, on_book) in blocks.iter().enumerate() {
            te.book.set_orders(party, orders(party, *on_book));
            te.clock.set(start + i as i64 * SEC);
            te.engine.end_block();
        }
        let end = start + blocks.len() as i64 * SEC;
        te.engine.calculate_sla_penalties(end).penalties_per_party[party].clone()
    }

    #[test]
    fn test_single_epoch_fee_penalties() {
        let cases: [(&[bool], SlaParams, Decimal); 6] = [
            (&[true, true, true, false], sla(5, 10, 4), Decimal::new(5, 1)),
            (&[true, false, true, true], sla(5, 10, 4), Decimal::new(5, 1)),
            (&[true, true, true, false], sla(5, 0, 4), Decimal::ZERO),
            (&[true, true, true, false], sla(5, 5, 4), Decimal::new(25, 2)),
            (&[true, true, true], sla(5, 10, 0), Decimal::ZERO),
            (&[true, false, true, false, false, true], sla(5, 10, 0), Decimal::ONE),
        ];

        for in_auction in [false, true] {
            for (blocks, params, expected) in cases.iter().cloned() {
                let (mut te, party) = setup(config(params), in_auction);
                let penalty = run_epoch(&mut te, &party, 100 * SEC, blocks);
                assert_eq!(penalty.fee, expected, "blocks {blocks:?}, in auction {in_auction}");
            }
        }
    }

    #[test]
    fn test_full_penalty_example() {
        // commitment 100000, nothing on the book for a 10 block epoch
        let mut te = test_engine_with(config(sla(5, 10, 4)));
        let party = PartyId::from("p");
        te.auction.set_opening_auction(true);
        let mut sub = submission(100_000);
        sub.fee = Decimal::new(5, 1);
        assert!(te.engine.submit(sub, &party, &mut te.ids).unwrap());
        assert_eq!(te.engine.provision_by_party(&party).unwrap().version, 1);
        te.auction.set_opening_auction(false);
        te.book.set_prices(Some(15), Some(15), Some(15), Some(15));

        let penalty = run_epoch(&mut te, &party, 0, &[false; 10]);
        assert_eq!(penalty.fee, Decimal::ONE);
        assert_eq!(penalty.bond, Decimal::new(5, 1));
    }

    #[test]
    fn test_no_mid_price_never_meets() {
        let (mut te, party) = setup(config(sla(5, 10, 4)), false);
        te.book.set_prices(None, Some(15), Some(15), Some(15));
        let penalty = run_epoch(&mut te, &party, 0, &[true; 4]);
        assert_eq!(penalty.fee, Decimal::ONE);
    }

    #[test]
    fn test_orders_outside_band_do_not_count() {
        let (mut te, party) = setup(config(sla(5, 10, 4)), false);
        // tighter band: [14.25, 15.75] keeps only the 15s (450 per side)
        te.engine.update_sla_params(SlaParams { price_range: Decimal::new(5, 2), ..sla(5, 10, 4) }).unwrap();
        te.engine.on_stake_to_ccy_volume_update(Decimal::new(5, 0));
        let penalty = run_epoch(&mut te, &party, 0, &[true; 4]);
        assert_eq!(penalty.fee, Decimal::ONE);

        let stats = te.engine.sla_stats(&party).unwrap();
        assert_eq!(stats.notional_volume_buys, Decimal::from(450));
        assert_eq!(stats.required_liquidity, Decimal::from(500));
    }

    #[test]
    fn test_auction_band_spans_last_and_indicative() {
        let (te, _) = setup(config(sla(5, 10, 4)), true);
        te.book.set_prices(Some(15), Some(15), Some(10), Some(20));
        assert_eq!(te.engine.sla_price_band(), Some((Decimal::from(8), Decimal::from(24))));

        te.book.set_prices(Some(15), Some(15), Some(20), Some(10));
        assert_eq!(te.engine.sla_price_band(), Some((Decimal::from(8), Decimal::from(24))));

        te.book.set_prices(Some(15), Some(15), None, Some(20));
        assert_eq!(te.engine.sla_price_band(), Some((Decimal::from(16), Decimal::from(24))));

        te.book.set_prices(Some(15), Some(15), Some(10), None);
        assert_eq!(te.engine.sla_price_band(), Some((Decimal::from(8), Decimal::from(12))));

        te.book.set_prices(Some(15), Some(15), None, None);
        assert_eq!(te.engine.sla_price_band(), None);
    }

    #[test]
    fn test_auction_band_ignores_mid_price() {
        let (mut te, party) = setup(config(sla(5, 10, 4)), true);
        // mid 15 would keep every order; the auction band [16, 24] keeps only the 17 and 18
        te.engine.on_stake_to_ccy_volume_update(Decimal::ONE);
        te.book.set_prices(Some(15), Some(15), None, Some(20));
        run_epoch(&mut te, &party, 0, &[true; 4]);

        let stats = te.engine.sla_stats(&party).unwrap();
        assert_eq!(stats.notional_volume_buys, Decimal::from(17 * 17 + 18 * 18));
        assert_eq!(stats.notional_volume_sells, Decimal::from(17 * 17 + 18 * 18));
        assert_eq!(stats.last_epoch_time_book_fraction, Decimal::ONE);
    }

    fn big_order(party: &PartyId, side: Side, price: &BigUint, size: u64) -> Order {
        Order {
            id: format!("{side}-big"),
            market_id: "market-id".into(),
            party: party.clone(),
            side,
            price: price.clone(),
            size,
            remaining: size,
            status: OrderStatus::Active,
            reference: String::new(),
            liquidity_provision_id: None,
            created_at: 0,
        }
    }

    /// Blocks at `start` with the given sell size, then the epoch's book fraction.
    fn huge_epoch(te: &mut TestEngine, party: &PartyId, start: Timestamp, sell_size: u64) -> Decimal {
        let price = BigUint::from(10u64.pow(18));
        te.engine.reset_sla_epoch(start);
        te.book.set_orders(
            party,
            vec![big_order(party, Side::Buy, &price, 10u64.pow(12)), big_order(party, Side::Sell, &price, sell_size)],
        );
        te.clock.set(start);
        te.engine.end_block();
        te.engine.calculate_sla_penalties(start + 4 * SEC);
        te.engine.sla_stats(party).unwrap().last_epoch_time_book_fraction
    }

    #[test]
    fn test_sla_compares_huge_commitments_exactly() {
        let mut te = test_engine_with(config(sla(5, 10, 4)));
        te.engine.on_stake_to_ccy_volume_update(Decimal::ONE);
        let party = PartyId::from("whale");
        let mut sub = submission(1);
        sub.commitment_amount = BigUint::from(10u32).pow(30);
        te.auction.set_opening_auction(true);
        te.engine.submit(sub, &party, &mut te.ids).unwrap();
        te.auction.set_opening_auction(false);
        te.book.set_prices(Some(10u64.pow(18)), Some(10u64.pow(18)), None, None);

        // 10^18 x 10^12 is exactly the 10^30 commitment on each side
        assert_eq!(huge_epoch(&mut te, &party, 0, 10u64.pow(12)), Decimal::ONE);
        // one contract short on the sell side
        assert_eq!(huge_epoch(&mut te, &party, 4 * SEC, 10u64.pow(12) - 1), Decimal::ZERO);

        let stats = te.engine.sla_stats(&party).unwrap();
        assert_eq!(stats.required_liquidity, Decimal::MAX);
        assert_eq!(stats.notional_volume_buys, Decimal::MAX);
    }

    #[test]
    fn test_multi_epoch_hysteresis() {
        let (mut te, party) = setup(config(sla(5, 10, 4)), false);
        let epoch = 4 * SEC;
        let mut start = 0;
        for _ in 0..3 {
            assert_eq!(run_epoch(&mut te, &party, start, &[false; 4]).fee, Decimal::ONE);
            start += epoch;
        }
        assert_eq!(run_epoch(&mut te, &party, start, &[true; 4]).fee, Decimal::ONE);
        start += epoch;
        assert_eq!(run_epoch(&mut te, &party, start, &[true; 4]).fee, Decimal::new(75, 2));
    }

    #[test]
    fn test_penalties_emit_sla_events() {
        let (mut te, party) = setup(config(sla(5, 10, 4)), false);
        run_epoch(&mut te, &party, 0, &[true; 4]);
        let stats: Vec<_> = te
            .broker
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::SlaPerformance { party, stats } => Some((party, stats)),
                _ => None,
            })
            .collect();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].0, party);
        assert_eq!(stats[0].1.last_epoch_time_book_fraction, Decimal::ONE);
    }

    #[test]
    fn test_liquidity_scores_sum_to_one() {
        let mut te = test_engine_with(config(sla(5, 10, 4)));
        te.auction.set_opening_auction(true);
        let parties = [PartyId::from("a"), PartyId::from("b"), PartyId::from("c")];
        for p in &parties {
            te.engine.submit(submission(100), p, &mut te.ids).unwrap();
        }
        te.book.set_orders(&parties[0], orders(&parties[0], true));
        te.book.set_orders(&parties[1], orders(&parties[1], true));

        let (min, max) = (BigUint::from(10u32), BigUint::from(20u32));
        let (bid, ask) = (Decimal::from(15), Decimal::from(16));
        let (current, total) = te.engine.current_liquidity_scores(bid, ask, &min, &max);
        assert_eq!(current.len(), 3);
        assert_eq!(current[&parties[2]], Decimal::ZERO);
        assert!(total > Decimal::ZERO);

        te.engine.update_average_liquidity_scores(bid, ask, &min, &max);
        let sum: Decimal = te.engine.average_liquidity_scores().values().copied().sum();
        assert_eq!(sum, Decimal::ONE);

        te.engine.reset_average_liquidity_scores();
        assert!(te.engine.average_liquidity_scores().is_empty());
    }
}
