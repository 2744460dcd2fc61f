//! Safety module. Guards every signature the replica produces against its persisted
//! voting history, so that it never signs conflicting messages for a round, even
//! across restarts.
use anyhow::Context as _;
use rootchain_crypto::sha256::Sha256;
use rootchain_roles::validator::{
    ExecutedBlock, QuorumCert, RoundNumber, SecretKey, Timeout, TimeoutCert, TimeoutMsg, Vote,
};
use rootchain_storage::{BlockStore, SafetyData};

/// Error returned when the safety rules forbid signing.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SafetyError {
    /// We already voted or timed out in this or a later round.
    #[error("already voted (round: {round}, highest voted round: {highest_voted})")]
    AlreadyVoted {
        round: RoundNumber,
        highest_voted: RoundNumber,
    },
    /// The block neither extends the previous round's QC nor is justified by a TC.
    #[error("block is not safe to extend")]
    NotSafeToExtend,
    /// Persisting the safety data failed.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug)]
pub(crate) struct SafetyModule {
    key: SecretKey,
    data: SafetyData,
    store: BlockStore,
}

impl SafetyModule {
    /// Loads the safety data from the store.
    pub(crate) fn new(key: SecretKey, store: BlockStore) -> anyhow::Result<Self> {
        let data = store.safety_data().context("safety_data()")?;
        tracing::debug!(
            "RootBFT replica - Loaded safety data: highest voted round {}, highest QC round {}",
            data.highest_voted_round,
            data.highest_qc_round
        );
        Ok(Self { key, data, store })
    }

    pub(crate) fn data(&self) -> SafetyData {
        self.data
    }

    /// Records a verified QC.
    pub(crate) fn update_high_qc(&mut self, qc: &QuorumCert) -> anyhow::Result<()> {
        if qc.round() <= self.data.highest_qc_round {
            return Ok(());
        }
        self.data.highest_qc_round = qc.round();
        self.persist()
    }

    /// Signs a vote for an executed block, committing `commit_hash`.
    pub(crate) fn sign_vote(
        &mut self,
        block: &ExecutedBlock,
        last_tc: Option<&TimeoutCert>,
        commit_hash: Option<Sha256>,
    ) -> Result<Vote, SafetyError> {
        let data = block.block.as_ref().ok_or(SafetyError::NotSafeToExtend)?;
        let round = data.round;
        if round <= self.data.highest_voted_round {
            return Err(SafetyError::AlreadyVoted {
                round,
                highest_voted: self.data.highest_voted_round,
            });
        }
        let extends_qc = data.qc.round().next() == round;
        let extends_tc = last_tc.is_some_and(|tc| {
            tc.round().next() == round && data.qc.round() >= tc.high_qc().round()
        });
        if !extends_qc && !extends_tc {
            return Err(SafetyError::NotSafeToExtend);
        }
        self.data.highest_voted_round = round;
        self.data.highest_qc_round = self.data.highest_qc_round.max(data.qc.round());
        self.persist()?;
        Ok(Vote::new(&self.key, block.vote_info(), commit_hash))
    }

    /// Signs a timeout for `timeout.round`. Afterwards the replica no longer votes in
    /// that round.
    pub(crate) fn sign_timeout(
        &mut self,
        timeout: Timeout,
        last_tc: Option<TimeoutCert>,
    ) -> Result<TimeoutMsg, SafetyError> {
        if timeout.round < self.data.highest_voted_round {
            return Err(SafetyError::AlreadyVoted {
                round: timeout.round,
                highest_voted: self.data.highest_voted_round,
            });
        }
        self.data.highest_voted_round = timeout.round;
        self.data.highest_qc_round = self.data.highest_qc_round.max(timeout.high_qc.round());
        self.persist()?;
        Ok(TimeoutMsg::new(&self.key, timeout, last_tc))
    }

    fn persist(&self) -> anyhow::Result<()> {
        self.store
            .set_safety_data(&self.data)
            .context("set_safety_data()")
    }
}
