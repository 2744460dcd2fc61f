use pretty_assertions::assert_eq;
use rootchain_roles::validator::RoundNumber;

use crate::root_bft::testonly::UnitTestHarness;

#[test]
fn commit_needs_two_chain() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new(rng, 4);
    let chain = util.process_chain(3);

    // QC(1) and QC(2) arrived with the proposals; neither commits block 1.
    assert_eq!(util.round(), RoundNumber(3));
    assert_eq!(util.committed_round(), RoundNumber(0));

    util.process_votes(&chain[3], &chain[2]);
    assert_eq!(util.round(), RoundNumber(4));
    assert_eq!(util.committed_round(), RoundNumber(1));

    let head = util.replica.block_tree.committed();
    assert_eq!(head.block.hash(), chain[1].hash());
    let seal = &head.commit_qc.as_ref().unwrap().ledger_commit_info;
    assert_eq!(seal.hash, Some(chain[1].root_hash));
    assert_eq!(seal.root_chain_round, RoundNumber(3));

    let stored = util
        .replica
        .config
        .block_store
        .committed_head()
        .unwrap()
        .unwrap();
    assert_eq!(stored, *head);
}

#[test]
fn commit_requires_consecutive_rounds() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new(rng, 4);
    let chain = util.process_chain(2);
    let (first, qc1) = (&chain[1], chain[1].qc.clone().unwrap());

    // Round 2 times out; block 3 extends block 1 with the TC.
    let tc = util.setup.make_tc(RoundNumber(2), &qc1);
    let mut third = util.make_block(RoundNumber(3), first);
    util.process_proposal(util.setup.make_proposal(&third, Some(tc)))
        .unwrap();
    assert_eq!(util.round(), RoundNumber(3));
    third.qc = Some(util.make_qc(&third, first));

    let fourth = util.process_next_block(&third);
    let fifth = util.process_next_block(&fourth);
    // QC(4) extends block 3, which does not directly follow block 1.
    assert_eq!(util.round(), RoundNumber(5));
    assert_eq!(util.committed_round(), RoundNumber(0));

    util.process_votes(&fifth, &fourth);
    assert_eq!(util.committed_round(), RoundNumber(3));
    // The abandoned block 2 is gone, block 1 is committed along with block 3.
    assert!(util.replica.block_tree.block_at(RoundNumber(2)).is_none());
    assert!(util.replica.block_tree.block_at(RoundNumber(1)).is_none());
    assert!(util
        .replica
        .config
        .block_store
        .load_block(RoundNumber(2))
        .unwrap()
        .is_none());
}

#[test]
fn commit_prunes_forks() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new(rng, 4);
    let chain = util.process_chain(2);

    // A certified block of round 5 extending block 1, as left by a TC for round 4.
    let mut fork = util.make_block(RoundNumber(5), &chain[1]);
    fork.qc = Some(util.make_qc(&fork, &chain[1]));
    util.replica.config.block_store.store_block(&fork).unwrap();
    util.replica.block_tree.add(fork);

    let third = util.process_next_block(&chain[2]);
    let fourth = util.process_next_block(&third);
    util.process_votes(&fourth, &third);
    assert_eq!(util.committed_round(), RoundNumber(2));

    // The fork does not extend block 2 and is dropped.
    let tree = &util.replica.block_tree;
    assert!(tree.block_at(RoundNumber(5)).is_none());
    assert_eq!(tree.block_at(RoundNumber(3)).unwrap().hash(), third.hash());
    assert_eq!(tree.block_at(RoundNumber(4)).unwrap().hash(), fourth.hash());
    let store = &util.replica.config.block_store;
    assert!(store.load_block(RoundNumber(5)).unwrap().is_none());
    assert!(store.load_block(RoundNumber(4)).unwrap().is_some());
}

#[test]
fn restart_recovers_state() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new(rng, 4);
    let chain = util.process_chain(3);
    util.process_votes(&chain[3], &chain[2]);
    let committed = util.replica.block_tree.committed().clone();
    let high_qc = util.replica.block_tree.high_qc().clone();

    util.restart();
    assert_eq!(*util.replica.block_tree.committed(), committed);
    assert_eq!(*util.replica.block_tree.high_qc(), high_qc);
    assert_eq!(util.round(), high_qc.round().next());
    assert_eq!(
        util.replica.safety.data().highest_voted_round,
        RoundNumber(3)
    );
}

#[test]
fn restart_does_not_vote_twice() {
    let rng = &mut rand::thread_rng();
    let mut util = UnitTestHarness::new(rng, 4);
    let genesis = util.genesis().clone();
    let block = util.make_block(RoundNumber(1), &genesis);
    let proposal = util.setup.make_proposal(&block, None);
    util.process_proposal(proposal.clone()).unwrap();

    util.restart();
    assert_eq!(util.round(), RoundNumber(1));
    assert!(util.process_proposal(proposal).is_err());
    assert!(util.drain().is_empty());
}
