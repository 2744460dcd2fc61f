use std::time::Duration;

use rootchain_roles::{shard::testonly::ShardSetup, validator::RoundNumber};
use test_casing::test_casing;

use crate::testonly::TestNetwork;

/// Upper bound on the duration of a network test, in simulated time.
const TEST_TIMEOUT: Duration = Duration::from_secs(120);

#[test_casing(3, [1, 4, 7])]
#[tokio::test(start_paused = true)]
async fn network_commits(num_validators: usize) {
    let rng = &mut rand::thread_rng();
    let mut net = TestNetwork::new(rng, num_validators, &[]);
    tokio::time::timeout(TEST_TIMEOUT, async {
        for i in 0..num_validators {
            net.wait_for_commit(i, RoundNumber(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn network_certifies_shard() {
    let rng = &mut rand::thread_rng();
    let mut net = TestNetwork::new(rng, 4, &[]);
    let shard = net.shard.shard;
    tokio::time::timeout(TEST_TIMEOUT, async {
        let mut prev = None;
        for _ in 0..3 {
            let ir = ShardSetup::next_record(rng, prev.as_ref());
            let issued = net.certify(&ir).await;
            assert_eq!(issued.len(), 4);
            for uc in issued.values() {
                uc.verify(&net.setup.trust_base, &shard).unwrap();
            }
            prev = Some(ir);
        }
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn network_tolerates_offline_validator() {
    let rng = &mut rand::thread_rng();
    let mut net = TestNetwork::new(rng, 4, &[3]);
    let shard = net.shard.shard;
    tokio::time::timeout(TEST_TIMEOUT, async {
        let ir = ShardSetup::next_record(rng, None);
        let issued = net.certify(&ir).await;
        assert_eq!(issued.len(), 3);
        assert!(!issued.contains_key(&net.nodes[3].key));
        for uc in issued.values() {
            uc.verify(&net.setup.trust_base, &shard).unwrap();
        }
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn offline_validator_catches_up() {
    let rng = &mut rand::thread_rng();
    let mut net = TestNetwork::new(rng, 4, &[3]);
    tokio::time::timeout(TEST_TIMEOUT, async {
        net.wait_for_commit(0, RoundNumber(8)).await;
        assert_eq!(net.nodes[3].committed_round(), RoundNumber::GENESIS);

        let key = net.nodes[3].key;
        net.network.set_online(&key, true);
        let target = net.nodes[0].committed_round();
        net.wait_for_commit(3, target).await;
    })
    .await
    .unwrap();
}
