//! This module contains utilities that are only meant for testing purposes.
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use rand::Rng;
use rootchain_orchestration::{Orchestration, ShardConfig, DEFAULT_RETENTION};
use rootchain_roles::{
    shard::{testonly::ShardSetup, InputRecord, PartitionTypeId},
    unicity::UnicityCertificate,
    validator::{self, testonly::Setup},
};
use rootchain_storage::{BlockStore, InMemoryStore};
use tokio::{sync::mpsc, task::JoinSet};

use crate::{
    create_input_channel,
    network::{IssuedCertificate, LocalNetwork},
    Config,
};

/// Time between two polls of a node's block store.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Builds the configuration of the i-th validator of `setup`, with fresh in-memory stores.
pub(crate) fn make_config(setup: &Setup, shard: &ShardSetup, i: usize) -> Config {
    let orchestration =
        Orchestration::new(Arc::new(InMemoryStore::new()), DEFAULT_RETENTION).unwrap();
    orchestration
        .add_shard_config(ShardConfig {
            partition_type: PartitionTypeId(1),
            partition: shard.shard.partition,
            shard: shard.shard.shard,
            epoch: validator::EpochNumber(0),
            activation_round: 0,
            trust_base: shard.trust_base.clone(),
            t2_timeout_ms: 2500,
        })
        .unwrap();
    Config {
        secret_key: setup.keys[i].clone(),
        trust_base: setup.trust_base.clone(),
        genesis: setup.genesis.clone(),
        round_timeout: Duration::from_secs(1),
        block_rate: Duration::from_millis(100),
        send_timeout: Duration::from_millis(500),
        sync_retries: 5,
        sync_backoff: Duration::from_millis(500),
        orchestration: Arc::new(orchestration),
        block_store: BlockStore::new(Arc::new(InMemoryStore::new())),
    }
}

/// A root validator running in a `TestNetwork`.
#[derive(Debug)]
pub(crate) struct Node {
    /// Validator key.
    pub(crate) key: validator::PublicKey,
    /// The node's block store, shared with its running replica.
    pub(crate) block_store: BlockStore,
}

impl Node {
    /// Round of the node's committed head.
    pub(crate) fn committed_round(&self) -> validator::RoundNumber {
        self.block_store
            .committed_head()
            .unwrap()
            .map_or(validator::RoundNumber::GENESIS, |head| head.round())
    }
}

/// Root validators running in the same process, connected by a `LocalNetwork`.
/// Nodes run until the network is dropped.
pub(crate) struct TestNetwork {
    pub(crate) setup: Setup,
    pub(crate) shard: ShardSetup,
    pub(crate) network: LocalNetwork,
    pub(crate) nodes: Vec<Node>,
    certificates: mpsc::UnboundedReceiver<IssuedCertificate>,
    tasks: JoinSet<anyhow::Result<()>>,
}

impl TestNetwork {
    /// Starts `num_validators` root validators with a single shard of 4 validators.
    /// Validators listed in `offline` are disconnected from the start.
    pub(crate) fn new(rng: &mut impl Rng, num_validators: usize, offline: &[usize]) -> Self {
        let setup = Setup::new(rng, num_validators);
        let shard = ShardSetup::default_shard(rng, 4);

        let mut nodes = vec![];
        let mut inbound = BTreeMap::new();
        let mut runs = vec![];
        for i in 0..num_validators {
            let cfg = make_config(&setup, &shard, i);
            let key = cfg.secret_key.public();
            let (inbound_send, inbound_recv) = create_input_channel();
            let (outbound_send, outbound_recv) = mpsc::unbounded_channel();
            inbound.insert(key, inbound_send);
            nodes.push(Node {
                key,
                block_store: cfg.block_store.clone(),
            });
            runs.push((cfg, outbound_send, inbound_recv, outbound_recv));
        }
        let (network, certificates) = LocalNetwork::new(Duration::from_millis(500), inbound);
        for i in offline {
            network.set_online(&nodes[*i].key, false);
        }

        let mut tasks = JoinSet::new();
        for (cfg, outbound_send, inbound_recv, outbound_recv) in runs {
            let key = cfg.secret_key.public();
            let network = network.clone();
            tasks.spawn(async move {
                network.run(key, outbound_recv).await;
                Ok(())
            });
            tasks.spawn(cfg.run(outbound_send, inbound_recv));
        }
        Self {
            setup,
            shard,
            network,
            nodes,
            certificates,
            tasks,
        }
    }

    /// Waits until the node has committed `round` or a later one.
    pub(crate) async fn wait_for_commit(&mut self, node: usize, round: validator::RoundNumber) {
        while self.nodes[node].committed_round() < round {
            tokio::select! {
                res = self.tasks.join_next() => panic!("node stopped: {res:?}"),
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Has a quorum of the shard validators request certification of `ir`, then waits
    /// for a certificate from every online root validator.
    pub(crate) async fn certify(
        &mut self,
        ir: &InputRecord,
    ) -> BTreeMap<validator::PublicKey, UnicityCertificate> {
        let quorum = self.shard.trust_base.quorum_threshold() as usize;
        for i in 0..quorum {
            self.network.submit(self.shard.request(i, ir)).await;
        }
        let online = self
            .nodes
            .iter()
            .filter(|n| self.network.is_online(&n.key))
            .count();
        let mut issued = BTreeMap::new();
        while issued.len() < online {
            let c = self.certificates.recv().await.unwrap();
            if c.certificate.input_record == *ir {
                issued.insert(c.issuer, c.certificate);
            }
        }
        issued
    }
}
