use std::collections::BTreeSet;

use assert_matches::assert_matches;
use rootchain_roles::{
    shard::testonly::ShardSetup,
    validator::{ExecutedBlock, IrChangeRequest, RootMsg, RoundNumber},
};

use crate::{
    io::{OutboundMsg, Target},
    root_bft::{
        certification,
        payload::{self, PayloadError},
        testonly::UnitTestHarness,
    },
};

#[test]
fn decision_is_forwarded_to_leaders() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new(rng, 4);
    let ir = ShardSetup::next_record(rng, None);

    for i in 0..2 {
        util.replica
            .on_certification_request(util.shard.request(i, &ir))
            .unwrap();
    }
    assert!(util.replica.aggregator.pending().is_empty());
    util.replica
        .on_certification_request(util.shard.request(2, &ir))
        .unwrap();
    let pending = util.replica.aggregator.pending();
    assert_eq!(pending.len(), 1);

    let me = util.owner_key().public();
    let leaders = [
        util.setup.trust_base.leader(RoundNumber(1)),
        util.setup.trust_base.leader(RoundNumber(2)),
    ];
    for msg in util.drain() {
        assert_matches!(
            (msg.target, msg.msg),
            (Target::Validator(key), OutboundMsg::Root(RootMsg::IrChangeRequest(change))) => {
                assert_ne!(key, me);
                assert!(leaders.contains(&key));
                assert_eq!(change, pending[0]);
            }
        );
    }
}

#[test]
fn forwarded_decision_is_adopted() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new(rng, 4);
    let ir = ShardSetup::next_record(rng, None);
    let change = util.shard.quorum_change(&ir);

    util.replica.on_ir_change_request(change.clone()).unwrap();
    // Adopting the same decision again is a no-op.
    util.replica.on_ir_change_request(change.clone()).unwrap();
    assert_eq!(util.replica.aggregator.pending(), vec![change]);

    // Requests for the decided round are not collected anymore.
    let res = util
        .replica
        .on_certification_request(util.shard.request(0, &ir));
    assert_matches!(res, Err(certification::Error::Old(_)));
}

#[test]
fn forwarded_decision_without_quorum() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new(rng, 4);
    let ir = ShardSetup::next_record(rng, None);
    let mut change = util.shard.quorum_change(&ir);
    change.requests.truncate(2);

    let res = util.replica.on_ir_change_request(change);
    assert_matches!(res, Err(certification::Error::Rejected(_)));
    assert!(util.replica.aggregator.pending().is_empty());
}

#[test]
fn certificate_issued_at_commit() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new_leader_of(rng, 4, RoundNumber(1));
    let shard = util.shard.shard;
    let ir = ShardSetup::next_record(rng, None);
    for i in 0..3 {
        util.replica
            .on_certification_request(util.shard.request(i, &ir))
            .unwrap();
    }
    let change = util.replica.aggregator.pending()[0].clone();

    // The leader includes the decision in its block.
    let proposal = util.new_leader_proposal();
    assert_eq!(proposal.block.payload.requests, vec![change]);
    util.process_proposal(proposal.clone()).unwrap();

    let genesis = util.genesis().clone();
    let mut first = ExecutedBlock::new(proposal.block, &genesis.state, vec![(shard, ir.clone())]);
    assert_eq!(first.changed, vec![shard]);
    first.qc = Some(util.make_qc(&first, &genesis));
    let second = util.process_next_block(&first);
    let third = util.process_next_block(&second);
    // A decision already in the pipeline is not proposed again.
    assert!(util
        .new_leader_proposal()
        .block
        .payload
        .requests
        .is_empty());
    assert!(UnitTestHarness::certificates(&util.drain()).is_empty());

    util.process_votes(&third, &second);
    assert_eq!(util.committed_round(), RoundNumber(1));
    let certificates = UnitTestHarness::certificates(&util.drain());
    assert_eq!(certificates.len(), 1);
    let uc = &certificates[0];
    assert_eq!(uc.input_record, ir);
    assert_eq!(uc.seal.hash, Some(first.root_hash));
    uc.verify(&util.setup.trust_base, &shard).unwrap();

    // A single modified byte breaks the certificate.
    let mut forged = uc.clone();
    forged.input_record.summary_value[0] ^= 1;
    assert!(forged.verify(&util.setup.trust_base, &shard).is_err());

    assert_eq!(util.replica.aggregator.certified(&shard), Some(ir.clone()));
    assert!(util.replica.aggregator.pending().is_empty());
    assert_eq!(
        util.replica.block_tree.committed().certificates.get(&shard),
        Some(uc)
    );

    // A late request for the certified round gets the certificate.
    let res = util
        .replica
        .on_certification_request(util.shard.request(3, &ir));
    assert_matches!(res, Err(certification::Error::Old(_)));
    assert_eq!(UnitTestHarness::certificates(&util.drain()), vec![uc.clone()]);
}

#[test]
fn certificate_repeated_after_t2_timeout() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new_leader_of(rng, 4, RoundNumber(1));
    let shard = util.shard.shard;
    let ir = ShardSetup::next_record(rng, None);
    let change = util.shard.quorum_change(&ir);
    util.replica.on_ir_change_request(change.clone()).unwrap();

    // Certify the record in round 1.
    let proposal = util.new_leader_proposal();
    assert_eq!(proposal.block.payload.requests, vec![change]);
    util.process_proposal(proposal.clone()).unwrap();
    let genesis = util.genesis().clone();
    let mut first = ExecutedBlock::new(proposal.block, &genesis.state, vec![(shard, ir.clone())]);
    first.qc = Some(util.make_qc(&first, &genesis));
    assert_eq!(first.state.certified_at(&shard), RoundNumber(1));
    let mut chain = vec![first];
    for _ in 0..5 {
        let parent = chain.last().unwrap().clone();
        chain.push(util.process_next_block(&parent));
    }
    // 500ms blocks and a 2500ms T2 timeout: the shard times out 6 rounds after round 1.
    let t2 = IrChangeRequest::t2_timeout(shard);
    let res = payload::check_change(
        &util.replica.config,
        &util.replica.aggregator,
        &chain[4],
        &BTreeSet::new(),
        RoundNumber(6),
        &t2,
    );
    assert_matches!(
        res,
        Err(PayloadError::NotTimedOut { certified_at, round, .. }) => {
            assert_eq!(certified_at, RoundNumber(1));
            assert_eq!(round, RoundNumber(6));
        }
    );
    let sixth = chain[5].clone();
    util.process_votes(&sixth, &chain[4]);
    assert_eq!(util.round(), RoundNumber(7));
    util.drain();

    // The leader of round 7 proposes a repeat certificate.
    let proposal = util.new_leader_proposal();
    assert_eq!(proposal.block.payload.requests, vec![t2.clone()]);
    let res = payload::check_change(
        &util.replica.config,
        &util.replica.aggregator,
        &sixth,
        &BTreeSet::new(),
        RoundNumber(7),
        &t2,
    );
    assert_eq!(res.unwrap(), Some(ir.clone()));

    let mut data = util.make_block(RoundNumber(7), &sixth).block.unwrap();
    data.payload.requests = vec![t2];
    let mut seventh = ExecutedBlock::new(data, &sixth.state, vec![(shard, ir.clone())]);
    assert_eq!(seventh.changed, vec![shard]);
    util.process_proposal(util.setup.make_proposal(&seventh, None))
        .unwrap();
    seventh.qc = Some(util.make_qc(&seventh, &sixth));
    let eighth = util.process_next_block(&seventh);
    let ninth = util.process_next_block(&eighth);
    util.drain();

    util.process_votes(&ninth, &eighth);
    assert_eq!(util.committed_round(), RoundNumber(7));
    let certificates = UnitTestHarness::certificates(&util.drain());
    assert_eq!(certificates.len(), 1);
    let uc = &certificates[0];
    assert_eq!(uc.input_record, ir);
    assert_eq!(uc.seal.hash, Some(seventh.root_hash));
    uc.verify(&util.setup.trust_base, &shard).unwrap();
    assert_eq!(
        util.replica.block_tree.committed().block.state.certified_at(&shard),
        RoundNumber(7)
    );
    assert_eq!(util.replica.aggregator.certified(&shard), Some(ir));
}
