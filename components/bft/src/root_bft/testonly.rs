use std::{sync::Arc, time::Duration};

use rand::Rng;
use rootchain_certification::Aggregator;
use rootchain_crypto::sha256::Sha256;
use rootchain_orchestration::{Orchestration, ShardConfig, DEFAULT_RETENTION};
use rootchain_roles::{
    shard::{testonly::ShardSetup, PartitionTypeId},
    unicity::UnicityCertificate,
    validator::{self, testonly::Setup, ExecutedBlock, RootMsg},
};
use rootchain_storage::{BlockStore, InMemoryStore};
use tokio::sync::{mpsc, watch};

use super::{block_tree, proposer, ProposalJustification, StateMachine};
use crate::{
    create_input_channel,
    io::{OutboundMsg, Target},
    Config, FromNetworkMessage, ToNetworkMessage,
};

/// `UnitTestHarness` provides various utilities for unit tests.
/// It is designed to simplify the setup and execution of test cases by encapsulating
/// common testing functionality.
///
/// It should be instantiated once for every test case.
pub(crate) struct UnitTestHarness {
    pub(crate) replica: StateMachine,
    pub(crate) setup: Setup,
    pub(crate) shard: ShardSetup,
    pub(crate) outbound_channel: mpsc::UnboundedReceiver<ToNetworkMessage>,
    pub(crate) _inbound_channel: mpsc::Sender<FromNetworkMessage>,
    pub(crate) proposer_channel: watch::Receiver<Option<ProposalJustification>>,
    sent: Vec<ToNetworkMessage>,
}

impl UnitTestHarness {
    /// Creates a new `UnitTestHarness` with the specified number of root validators and a
    /// single shard of 4 validators. The replica runs with the first key.
    pub(crate) fn new(rng: &mut impl Rng, num_validators: usize) -> UnitTestHarness {
        let setup = Setup::new(rng, num_validators);
        let shard = ShardSetup::default_shard(rng, 4);
        Self::new_with_setup(setup, shard, 0)
    }

    /// Creates a harness whose replica is the leader of `round`.
    pub(crate) fn new_leader_of(
        rng: &mut impl Rng,
        num_validators: usize,
        round: validator::RoundNumber,
    ) -> UnitTestHarness {
        let setup = Setup::new(rng, num_validators);
        let shard = ShardSetup::default_shard(rng, 4);
        let leader = setup.trust_base.leader(round);
        let index = setup
            .keys
            .iter()
            .position(|k| k.public() == leader)
            .unwrap();
        Self::new_with_setup(setup, shard, index)
    }

    /// Creates a harness for the validator with the given index in `setup`.
    pub(crate) fn new_with_setup(setup: Setup, shard: ShardSetup, index: usize) -> Self {
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
        let cfg = Arc::new(Config {
            secret_key: setup.keys[index].clone(),
            trust_base: setup.trust_base.clone(),
            genesis: setup.genesis.clone(),
            round_timeout: Duration::from_secs(2),
            block_rate: Duration::from_millis(500),
            send_timeout: Duration::from_secs(1),
            sync_retries: 3,
            sync_backoff: Duration::from_secs(1),
            orchestration: Arc::new(orchestration),
            block_store: BlockStore::new(Arc::new(InMemoryStore::new())),
        });
        cfg.validate().unwrap();
        let aggregator = Arc::new(Aggregator::new(
            cfg.orchestration.clone(),
            &cfg.genesis.state,
        ));
        let (outbound_send, outbound_recv) = mpsc::unbounded_channel();
        let (inbound_send, inbound_recv) = create_input_channel();
        let (proposer_sender, proposer_receiver) = watch::channel(None);
        let replica =
            StateMachine::start(cfg, aggregator, outbound_send, inbound_recv, proposer_sender)
                .unwrap();
        Self {
            replica,
            setup,
            shard,
            outbound_channel: outbound_recv,
            _inbound_channel: inbound_send,
            proposer_channel: proposer_receiver,
            sent: vec![],
        }
    }

    /// Restarts the replica from its block store, as after a crash. Pending messages
    /// and in-memory state are lost.
    pub(crate) fn restart(&mut self) {
        let cfg = self.replica.config.clone();
        let aggregator = Arc::new(Aggregator::new(
            cfg.orchestration.clone(),
            &cfg.genesis.state,
        ));
        let (outbound_send, outbound_recv) = mpsc::unbounded_channel();
        let (inbound_send, inbound_recv) = create_input_channel();
        let (proposer_sender, proposer_receiver) = watch::channel(None);
        self.replica =
            StateMachine::start(cfg, aggregator, outbound_send, inbound_recv, proposer_sender)
                .unwrap();
        self.outbound_channel = outbound_recv;
        self._inbound_channel = inbound_send;
        self.proposer_channel = proposer_receiver;
        self.sent.clear();
    }

    pub(crate) fn owner_key(&self) -> &validator::SecretKey {
        &self.replica.config.secret_key
    }

    pub(crate) fn genesis(&self) -> &ExecutedBlock {
        &self.setup.genesis
    }

    pub(crate) fn round(&self) -> validator::RoundNumber {
        self.replica.pacemaker.round()
    }

    pub(crate) fn committed_round(&self) -> validator::RoundNumber {
        self.replica.block_tree.committed().round()
    }

    /// Root hash committed by a QC for a child of `parent`.
    pub(crate) fn commit_hash(parent: &ExecutedBlock) -> Option<Sha256> {
        block_tree::commit_hash(parent)
    }

    /// Builds an empty block of the round's leader on top of `parent`, which must carry its QC.
    pub(crate) fn make_block(
        &self,
        round: validator::RoundNumber,
        parent: &ExecutedBlock,
    ) -> ExecutedBlock {
        self.setup.make_block(round, parent)
    }

    /// QC signed by every validator for `block`, extending `parent`.
    pub(crate) fn make_qc(
        &self,
        block: &ExecutedBlock,
        parent: &ExecutedBlock,
    ) -> validator::QuorumCert {
        self.setup.make_qc(block, Self::commit_hash(parent))
    }

    /// Proposes an empty block on top of `parent` in the next round and has the replica
    /// process it. Returns the block with the QC the validators would form for it.
    pub(crate) fn process_next_block(&mut self, parent: &ExecutedBlock) -> ExecutedBlock {
        let mut block = self.make_block(parent.round().next(), parent);
        self.process_proposal(self.setup.make_proposal(&block, None))
            .unwrap();
        block.qc = Some(self.make_qc(&block, parent));
        block
    }

    /// Builds a chain of `len` certified blocks on top of genesis, processing every
    /// proposal. Returns the chain, genesis first.
    pub(crate) fn process_chain(&mut self, len: usize) -> Vec<ExecutedBlock> {
        let mut chain = vec![self.genesis().clone()];
        for _ in 0..len {
            let parent = chain.last().unwrap().clone();
            chain.push(self.process_next_block(&parent));
        }
        chain
    }

    /// Has the replica process a proposal and returns its vote.
    pub(crate) fn process_proposal(
        &mut self,
        proposal: validator::Proposal,
    ) -> Result<validator::Vote, super::proposal::Error> {
        self.replica.on_proposal(proposal)?;
        let mut msgs = self.drain();
        let i = msgs
            .iter()
            .position(|m| matches!(m.msg, OutboundMsg::Root(RootMsg::Vote(_))))
            .unwrap();
        let OutboundMsg::Root(RootMsg::Vote(vote)) = msgs.remove(i).msg else {
            unreachable!();
        };
        // Keep the rest for `drain()`.
        self.sent = msgs;
        Ok(vote)
    }

    /// Feeds the votes of a quorum of validators for `block` to the replica.
    pub(crate) fn process_votes(&mut self, block: &ExecutedBlock, parent: &ExecutedBlock) {
        let quorum = self.setup.trust_base.quorum_threshold() as usize;
        let votes = self.setup.make_votes(block, Self::commit_hash(parent));
        for vote in votes.into_iter().take(quorum) {
            self.replica.on_vote(vote).unwrap();
        }
    }

    /// Proposal of the replica for its current round, built by the proposer.
    pub(crate) fn new_leader_proposal(&self) -> validator::Proposal {
        let justification = self.replica.get_justification().unwrap();
        proposer::create_proposal(
            &self.replica.config,
            &self.replica.aggregator,
            justification,
        )
        .unwrap()
    }

    /// Messages sent by the replica since the last drain. Votes returned by
    /// `process_proposal()` are not included.
    pub(crate) fn drain(&mut self) -> Vec<ToNetworkMessage> {
        let mut msgs = std::mem::take(&mut self.sent);
        while let Ok(msg) = self.outbound_channel.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    /// Certificates among the messages.
    pub(crate) fn certificates(msgs: &[ToNetworkMessage]) -> Vec<UnicityCertificate> {
        msgs.iter()
            .filter_map(|m| match (&m.target, &m.msg) {
                (Target::Shard(_), OutboundMsg::Certificate(uc)) => Some(uc.clone()),
                _ => None,
            })
            .collect()
    }
}
