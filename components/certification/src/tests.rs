use super::*;
use assert_matches::assert_matches;
use rand::Rng;
use rootchain_orchestration::{ShardConfig, DEFAULT_RETENTION};
use rootchain_roles::{
    shard::{testonly::ShardSetup, PartitionId, PartitionTypeId, ShardId},
    validator::SecretKey,
};
use rootchain_storage::InMemoryStore;

fn orchestration(setups: &[&ShardSetup]) -> Arc<Orchestration> {
    let orc = Orchestration::new(Arc::new(InMemoryStore::new()), DEFAULT_RETENTION).unwrap();
    for setup in setups {
        orc.add_shard_config(ShardConfig {
            partition_type: PartitionTypeId(1),
            partition: setup.shard.partition,
            shard: setup.shard.shard,
            epoch: EpochNumber(0),
            activation_round: 0,
            trust_base: setup.trust_base.clone(),
            t2_timeout_ms: 2500,
        })
        .unwrap();
    }
    Arc::new(orc)
}

fn aggregator(setups: &[&ShardSetup]) -> Aggregator {
    Aggregator::new(orchestration(setups), &RootState::default())
}

#[test]
fn test_quorum_three_of_four() {
    let rng = &mut rand::thread_rng();
    let setup = ShardSetup::default_shard(rng, 4);
    let agg = aggregator(&[&setup]);
    let ir = ShardSetup::next_record(rng, None);
    let mut other = ShardSetup::next_record(rng, None);
    other.round_number = ir.round_number;

    assert_eq!(agg.add_request(setup.request(0, &ir)).unwrap(), None);
    assert_eq!(agg.add_request(setup.request(1, &ir)).unwrap(), None);
    assert_eq!(agg.add_request(setup.request(3, &other)).unwrap(), None);
    let change = agg.add_request(setup.request(2, &ir)).unwrap().unwrap();
    assert_eq!(change.reason, CertReqReason::Quorum);
    assert_eq!(change.requests.len(), 3);
    assert_eq!(change.verify(&setup.trust_base).unwrap(), Some(ir.clone()));
    assert_eq!(agg.verify_change(&change).unwrap(), Some(ir));
    assert_eq!(agg.pending(), vec![change]);
}

#[test]
fn test_quorum_not_possible() {
    let rng = &mut rand::thread_rng();
    let setup = ShardSetup::default_shard(rng, 4);
    let agg = aggregator(&[&setup]);
    let ir = ShardSetup::next_record(rng, None);
    let records: Vec<_> = (0..2)
        .map(|_| {
            let mut other = ShardSetup::next_record(rng, None);
            other.round_number = ir.round_number;
            other
        })
        .collect();

    assert_eq!(agg.add_request(setup.request(0, &ir)).unwrap(), None);
    assert_eq!(agg.add_request(setup.request(1, &ir)).unwrap(), None);
    // 2-1 with one validator missing: quorum is still reachable.
    assert_eq!(agg.add_request(setup.request(2, &records[0])).unwrap(), None);
    let change = agg
        .add_request(setup.request(3, &records[1]))
        .unwrap()
        .unwrap();
    assert_eq!(change.reason, CertReqReason::QuorumNotPossible);
    assert_eq!(change.requests.len(), 4);
    assert_eq!(change.verify(&setup.trust_base).unwrap(), None);
}

#[test]
fn test_resubmission_overwrites() {
    let rng = &mut rand::thread_rng();
    let setup = ShardSetup::default_shard(rng, 4);
    let agg = aggregator(&[&setup]);
    let ir = ShardSetup::next_record(rng, None);
    let mut other = ShardSetup::next_record(rng, None);
    other.round_number = ir.round_number;

    // Validator 0 changes its mind; only its latest request counts.
    assert_eq!(agg.add_request(setup.request(0, &other)).unwrap(), None);
    assert_eq!(agg.add_request(setup.request(0, &ir)).unwrap(), None);
    assert_eq!(agg.add_request(setup.request(1, &ir)).unwrap(), None);
    let change = agg.add_request(setup.request(2, &ir)).unwrap().unwrap();
    assert_eq!(change.reason, CertReqReason::Quorum);
    assert_eq!(change.requests.len(), 3);
    assert!(change.requests.iter().all(|r| r.input_record == ir));
}

#[test]
fn test_stale_requests() {
    let rng = &mut rand::thread_rng();
    let setup = ShardSetup::default_shard(rng, 4);
    let agg = aggregator(&[&setup]);
    let ir = ShardSetup::next_record(rng, None);
    for i in 0..3 {
        agg.add_request(setup.request(i, &ir)).unwrap();
    }
    assert_matches!(
        agg.add_request(setup.request(3, &ir)),
        Err(Error::DecisionPending { round, .. }) if round == ir.round_number
    );

    agg.on_commit(setup.shard, ir.round_number, Some(&ir));
    assert!(agg.pending().is_empty());
    assert_eq!(agg.certified(&setup.shard), Some(ir.clone()));
    assert_matches!(
        agg.add_request(setup.request(3, &ir)),
        Err(Error::Old { .. })
    );

    // The next round has to extend the certified record.
    let next = ShardSetup::next_record(rng, Some(&ir));
    let mut unrelated = next.clone();
    unrelated.previous_hash = rng.gen();
    assert_matches!(
        agg.add_request(setup.request(0, &unrelated)),
        Err(Error::HashChainMismatch)
    );
    assert_eq!(agg.add_request(setup.request(0, &next)).unwrap(), None);
}

#[test]
fn test_quorum_not_possible_commit_allows_retry() {
    let rng = &mut rand::thread_rng();
    let setup = ShardSetup::default_shard(rng, 3);
    let agg = aggregator(&[&setup]);
    let ir = ShardSetup::next_record(rng, None);
    let mut other = ShardSetup::next_record(rng, None);
    other.round_number = ir.round_number;
    // With 3 validators, two disagreeing requests rule out a quorum.
    assert_eq!(agg.add_request(setup.request(0, &ir)).unwrap(), None);
    let change = agg.add_request(setup.request(1, &other)).unwrap().unwrap();
    assert_eq!(change.reason, CertReqReason::QuorumNotPossible);

    agg.on_commit(setup.shard, ir.round_number, None);
    assert!(agg.pending().is_empty());
    assert_eq!(agg.certified(&setup.shard), None);
    for i in 0..2 {
        assert_eq!(agg.add_request(setup.request(i, &ir)).unwrap(), None);
    }
    let change = agg.add_request(setup.request(2, &ir)).unwrap().unwrap();
    assert_eq!(change.reason, CertReqReason::Quorum);
}

#[test]
fn test_invalid_requests() {
    let rng = &mut rand::thread_rng();
    let setup = ShardSetup::default_shard(rng, 4);
    let agg = aggregator(&[&setup]);
    let ir = ShardSetup::next_record(rng, None);

    let mut wrong_epoch = ir.clone();
    wrong_epoch.epoch = EpochNumber(1);
    assert_matches!(
        agg.add_request(setup.request(0, &wrong_epoch)),
        Err(Error::WrongEpoch { .. })
    );

    let outsider: SecretKey = rng.gen();
    let req = BlockCertificationRequest::new(&outsider, setup.shard, ir.clone());
    assert_matches!(
        agg.add_request(req),
        Err(Error::InvalidRequest(
            CertificationRequestVerifyError::UnknownSigner { .. }
        ))
    );

    let mut forged = setup.request(0, &ir);
    forged.input_record.summary_value.push(1);
    assert_matches!(
        agg.add_request(forged),
        Err(Error::InvalidRequest(
            CertificationRequestVerifyError::InvalidSignature
        ))
    );

    let unknown = ShardKey::new(PartitionId(7), ShardId(0));
    let req = BlockCertificationRequest::new(&setup.keys[0], unknown, ir);
    assert_matches!(
        agg.add_request(req),
        Err(Error::Config(OrchestrationError::UnknownShard(_)))
    );
    assert!(agg.pending().is_empty());
}

#[test]
fn test_forwarded_decisions() {
    let rng = &mut rand::thread_rng();
    let setup = ShardSetup::default_shard(rng, 4);
    let agg = aggregator(&[&setup]);
    let ir = ShardSetup::next_record(rng, None);

    let mut weak = setup.quorum_change(&ir);
    weak.requests.truncate(2);
    assert_matches!(
        agg.add_decision(weak),
        Err(Error::InvalidChange(
            IrChangeRequestVerifyError::NotEnoughVotes { got: 2, want: 3 }
        ))
    );

    let change = setup.quorum_change(&ir);
    agg.add_decision(change.clone()).unwrap();
    agg.add_decision(change.clone()).unwrap();
    assert_eq!(agg.pending(), vec![change]);
    assert_matches!(
        agg.add_request(setup.request(0, &ir)),
        Err(Error::DecisionPending { .. })
    );
}

#[test]
fn test_reset() {
    let rng = &mut rand::thread_rng();
    let setup = ShardSetup::default_shard(rng, 4);
    let agg = aggregator(&[&setup]);
    let ir = ShardSetup::next_record(rng, None);
    agg.add_decision(setup.quorum_change(&ir)).unwrap();

    let state = RootState::default().with_changes([(setup.shard, ir.clone())]);
    agg.reset(&state);
    assert!(agg.pending().is_empty());
    assert_eq!(agg.certified(&setup.shard), Some(ir.clone()));
    assert_matches!(
        agg.add_request(setup.request(0, &ir)),
        Err(Error::Old { .. })
    );

    // A pending QuorumNotPossible for the next round is dropped, and the round can be
    // aggregated again.
    let next = ShardSetup::next_record(rng, Some(&ir));
    let mut forks = [next.clone(), next.clone()];
    for fork in &mut forks {
        fork.hash = rng.gen();
    }
    agg.add_request(setup.request(0, &next)).unwrap();
    agg.add_request(setup.request(1, &next)).unwrap();
    agg.add_request(setup.request(2, &forks[0])).unwrap();
    let change = agg
        .add_request(setup.request(3, &forks[1]))
        .unwrap()
        .unwrap();
    assert_eq!(change.reason, CertReqReason::QuorumNotPossible);
    assert_eq!(agg.pending(), vec![change]);

    agg.reset(&state);
    assert!(agg.pending().is_empty());
    assert_eq!(agg.certified(&setup.shard), Some(ir));
    for i in 0..2 {
        assert_eq!(agg.add_request(setup.request(i, &next)).unwrap(), None);
    }
    let change = agg.add_request(setup.request(2, &next)).unwrap().unwrap();
    assert_eq!(change.reason, CertReqReason::Quorum);
}

#[test]
fn test_shards_are_independent() {
    let rng = &mut rand::thread_rng();
    let setups: Vec<_> = (0..4)
        .map(|i| ShardSetup::new(rng, ShardKey::new(PartitionId(1), ShardId(i)), 4))
        .collect();
    let agg = aggregator(&setups.iter().collect::<Vec<_>>());
    let records: Vec<_> = setups
        .iter()
        .map(|_| ShardSetup::next_record(rng, None))
        .collect();

    // One shard stays undecided while the others are aggregated concurrently.
    agg.add_request(setups[0].request(0, &records[0])).unwrap();
    std::thread::scope(|s| {
        for (setup, ir) in setups.iter().zip(&records).skip(1) {
            let agg = &agg;
            s.spawn(move || {
                let mut decided = None;
                for i in 0..3 {
                    decided = agg.add_request(setup.request(i, ir)).unwrap();
                }
                assert_eq!(decided.unwrap().reason, CertReqReason::Quorum);
            });
        }
    });
    let pending = agg.pending();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|c| c.shard_key() != setups[0].shard));
}
