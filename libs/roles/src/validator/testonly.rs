//! Test-only utilities.
use super::{
    BlockData, EpochNumber, ExecutedBlock, LeaderSelectionMode, Payload, Proposal, QuorumCert,
    RootState, RoundNumber, SecretKey, Timeout, TimeoutCert, TimeoutMsg, TrustBase, Vote,
    WeightedValidator,
};
use rand::Rng;
use rootchain_crypto::sha256::Sha256;

/// Root chain test setup: validator keys, trust base and genesis.
#[derive(Debug, Clone)]
pub struct Setup {
    /// Validators' secret keys, in trust base order.
    pub keys: Vec<SecretKey>,
    /// Root trust base.
    pub trust_base: TrustBase,
    /// Genesis block.
    pub genesis: ExecutedBlock,
}

impl Setup {
    /// New `Setup` with validators of equal weight.
    pub fn new(rng: &mut impl Rng, validators: usize) -> Self {
        Self::new_with_weights(rng, vec![1; validators])
    }

    /// New `Setup` with the given validator weights.
    pub fn new_with_weights(rng: &mut impl Rng, weights: Vec<u64>) -> Self {
        let keys: Vec<SecretKey> = weights.iter().map(|_| rng.gen()).collect();
        let trust_base = TrustBase::new(
            keys.iter().zip(&weights).map(|(k, w)| WeightedValidator {
                key: k.public(),
                weight: *w,
            }),
            LeaderSelectionMode::Weighted,
        )
        .unwrap();
        let mut keys = keys;
        keys.sort_by_key(SecretKey::public);
        Self {
            keys,
            trust_base,
            genesis: ExecutedBlock::genesis(RootState::default()),
        }
    }

    /// QC of the genesis block.
    pub fn genesis_qc(&self) -> QuorumCert {
        self.genesis.qc.clone().unwrap()
    }

    /// Secret key of the given validator.
    pub fn key_of(&self, public: &super::PublicKey) -> &SecretKey {
        self.keys.iter().find(|k| k.public() == *public).unwrap()
    }

    /// Secret key of the leader of the round.
    pub fn leader_key(&self, round: RoundNumber) -> &SecretKey {
        self.key_of(&self.trust_base.leader(round))
    }

    /// Builds a block of the round's leader on top of `parent`.
    pub fn make_block(&self, round: RoundNumber, parent: &ExecutedBlock) -> ExecutedBlock {
        let block = BlockData {
            author: self.trust_base.leader(round),
            round,
            epoch: EpochNumber(0),
            timestamp: 1_000 * round.0,
            payload: Payload::default(),
            qc: parent.qc.clone().unwrap(),
        };
        ExecutedBlock::new(block, &parent.state, vec![])
    }

    /// Signed proposal of an executed block.
    pub fn make_proposal(&self, block: &ExecutedBlock, tc: Option<TimeoutCert>) -> Proposal {
        let data = block.block.clone().unwrap();
        Proposal::new(self.key_of(&data.author), data, tc)
    }

    /// Votes of all validators for the block.
    pub fn make_votes(&self, block: &ExecutedBlock, commit_hash: Option<Sha256>) -> Vec<Vote> {
        self.keys
            .iter()
            .map(|k| Vote::new(k, block.vote_info(), commit_hash))
            .collect()
    }

    /// QC signed by all validators.
    pub fn make_qc(&self, block: &ExecutedBlock, commit_hash: Option<Sha256>) -> QuorumCert {
        let votes = self.make_votes(block, commit_hash);
        let mut qc = QuorumCert::new(&votes[0]);
        for v in &votes {
            qc.add(v).unwrap();
        }
        qc
    }

    /// Timeout messages of all validators.
    pub fn make_timeouts(&self, round: RoundNumber, high_qc: &QuorumCert) -> Vec<TimeoutMsg> {
        self.keys
            .iter()
            .map(|k| {
                let timeout = Timeout {
                    epoch: EpochNumber(0),
                    round,
                    high_qc: high_qc.clone(),
                };
                TimeoutMsg::new(k, timeout, None)
            })
            .collect()
    }

    /// TC signed by all validators.
    pub fn make_tc(&self, round: RoundNumber, high_qc: &QuorumCert) -> TimeoutCert {
        let msgs = self.make_timeouts(round, high_qc);
        let mut tc = TimeoutCert::new(msgs[0].timeout.clone());
        for m in &msgs {
            tc.add(m).unwrap();
        }
        tc
    }
}
