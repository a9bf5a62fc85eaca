//! Replicas fed the same transactions must agree on every byte of state.

use num_bigint::BigUint;
use rust_decimal::Decimal;
use std::sync::Arc;

use liquidity_sla::core::{
    LiquidityOrder, LiquidityProvisionAmendment, LiquidityProvisionSubmission, OrderBook, PartyId, PeggedReference,
    Side, TimeService, Timestamp,
};
use liquidity_sla::sim::{
    FixedClock, FlatRiskModel, InMemoryOrderBook, RecordingBroker, SequentialIdGen, StaticAuction, StaticPriceMonitor,
};
use liquidity_sla::{Collaborators, Engine, EngineConfig, Result};

const SEC: Timestamp = 1_000_000_000;

struct Replica {
    engine: Engine,
    clock: Arc<FixedClock>,
    book: Arc<InMemoryOrderBook>,
    auction: Arc<StaticAuction>,
    broker: Arc<RecordingBroker>,
    ids: SequentialIdGen,
}

fn replica() -> Replica {
    let clock = Arc::new(FixedClock::new(SEC));
    let book = Arc::new(InMemoryOrderBook::new());
    let auction = Arc::new(StaticAuction::new(false, true));
    let broker = Arc::new(RecordingBroker::new());
    let engine = Engine::new(
        EngineConfig::default(),
        Collaborators {
            time: clock.clone(),
            broker: broker.clone(),
            order_book: book.clone(),
            auction: auction.clone(),
            risk_model: Arc::new(FlatRiskModel::new(Decimal::new(5, 1))),
            price_monitor: Arc::new(StaticPriceMonitor::new(Decimal::ONE, Decimal::from(1_000))),
        },
    )
    .unwrap();
    Replica { engine, clock, book, auction, broker, ids: SequentialIdGen::new() }
}

fn submission(commitment: u64, offset: u32) -> LiquidityProvisionSubmission {
    LiquidityProvisionSubmission {
        market_id: "market-id".into(),
        commitment_amount: BigUint::from(commitment),
        fee: Decimal::new(1, 2),
        reference: "lp".into(),
        buys: vec![LiquidityOrder::new(PeggedReference::BestBid, 1, offset)],
        sells: vec![LiquidityOrder::new(PeggedReference::BestAsk, 1, offset)],
    }
}

fn reprice(side: Side, reference: PeggedReference, offset: &BigUint) -> Result<BigUint> {
    let base = match reference {
        PeggedReference::BestBid => BigUint::from(99u32),
        PeggedReference::BestAsk => BigUint::from(101u32),
        PeggedReference::Mid => BigUint::from(100u32),
    };
    Ok(match side {
        Side::Buy => base - offset,
        Side::Sell => base + offset,
    })
}

fn deploy(r: &mut Replica) {
    let (creates, cancels) = r.engine.update(&BigUint::from(50u32), &BigUint::from(150u32), reprice);
    r.book.apply(creates, cancels);
}

/// Opening auction, a few blocks, one epoch boundary and some amendments.
fn run_script(r: &mut Replica) {
    let (a, b, c) = (PartyId::from("alice"), PartyId::from("bob"), PartyId::from("carol"));

    r.engine.submit(submission(1_000, 1), &a, &mut r.ids).unwrap();
    r.engine.submit(submission(2_000, 10), &b, &mut r.ids).unwrap();
    r.auction.set_opening_auction(false);
    r.book.set_prices(Some(99), Some(101), Some(100), None);

    r.engine.submit(submission(500, 2), &c, &mut r.ids).unwrap();
    r.engine.reset_sla_epoch(r.clock.now());
    deploy(r);

    for _ in 0..5 {
        r.clock.advance(SEC);
        r.engine.end_block();
        r.engine.update_average_liquidity_scores(
            Decimal::from(99),
            Decimal::from(101),
            &BigUint::from(50u32),
            &BigUint::from(150u32),
        );
    }

    let amendment = LiquidityProvisionAmendment {
        commitment_amount: Some(BigUint::from(1_500u32)),
        buys: Some(vec![LiquidityOrder::new(PeggedReference::Mid, 1, 3u32)]),
        ..Default::default()
    };
    let to_cancel = r.engine.amend(amendment, &a, &mut r.ids).unwrap();
    r.book.apply(Vec::new(), vec![to_cancel]);
    deploy(r);

    r.clock.advance(5 * SEC);
    r.engine.end_block();
    r.engine.calculate_sla_penalties(r.clock.now());
    r.engine.apply_pending_provisions(r.clock.now());
    r.engine.reset_sla_epoch(r.clock.now());
}

#[test]
fn test_replicas_agree_on_every_key() {
    let mut r1 = replica();
    let mut r2 = replica();
    run_script(&mut r1);
    run_script(&mut r2);

    assert_eq!(r1.broker.events(), r2.broker.events());
    for key in r1.engine.keys() {
        assert_eq!(r1.engine.get_state(&key).unwrap(), r2.engine.get_state(&key).unwrap(), "{key}");
        assert_eq!(r1.engine.state_hash(&key).unwrap(), r2.engine.state_hash(&key).unwrap());
    }
    assert!(r1.engine.provision_by_party(&PartyId::from("carol")).is_some());
}

#[test]
fn test_restored_replica_continues_identically() {
    let mut live = replica();
    run_script(&mut live);

    let mut restored = replica();
    restored.auction.set_opening_auction(false);
    restored.book.set_prices(Some(99), Some(101), Some(100), None);
    restored.clock.set(live.clock.now());
    for party in ["alice", "bob", "carol"] {
        let party = PartyId::from(party);
        restored.book.set_orders(&party, live.book.orders_per_party(&party));
    }
    for key in live.engine.keys() {
        let data = live.engine.get_state(&key).unwrap();
        restored.engine.load_state(&key, &data).unwrap();
    }

    for r in [&mut live, &mut restored] {
        r.clock.advance(10 * SEC);
        r.engine.end_block();
        r.engine.calculate_sla_penalties(r.clock.now());
    }

    for key in live.engine.keys() {
        assert_eq!(live.engine.state_hash(&key).unwrap(), restored.engine.state_hash(&key).unwrap(), "{key}");
    }
    let alice = PartyId::from("alice");
    assert_eq!(live.engine.sla_stats(&alice), restored.engine.sla_stats(&alice));
}
