//! Tree of blocks above the committed head, and the 2-chain commit rule.
//!
//! Every block in the tree descends from the committed head. A block enters the tree
//! when its proposal is accepted and is persisted once a QC certifies it. When a QC for
//! block `B''` arrives whose parent `B'` directly follows its own parent `B`
//! (`B'.round == B.round + 1`), `B` is committed: the QC carries the seal over
//! `B.root_hash`, and unicity certificates are issued for every shard changed on the
//! path from the old head to `B`.
use anyhow::Context as _;
use rootchain_crypto::sha256::Sha256;
use rootchain_roles::{
    shard::ShardKey,
    unicity::UnicityCertificate,
    validator::{BlockHash, CommittedHead, ExecutedBlock, QuorumCert, RoundNumber, StateMsg},
};
use rootchain_storage::BlockStore;
use std::collections::{BTreeMap, BTreeSet};

/// Error returned by `BlockTree::insert_qc()`.
#[derive(Debug, thiserror::Error)]
pub(crate) enum BlockTreeError {
    /// The certified block, or one of its ancestors, is unknown.
    #[error("missing block (round: {round}, hash: {hash:?})")]
    MissingBlock { round: RoundNumber, hash: BlockHash },
    /// The QC commits another root hash than the one implied by the chain.
    #[error("QC commit hash does not match the chain")]
    CommitHashMismatch,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Outcome of committing a block.
#[derive(Debug)]
pub(crate) struct Commit {
    /// The new committed head.
    pub(crate) head: CommittedHead,
    /// Newly committed blocks, oldest first. The last one is the head block.
    pub(crate) blocks: Vec<ExecutedBlock>,
    /// Certificates issued by this commit.
    pub(crate) certificates: Vec<UnicityCertificate>,
}

/// Root hash that a QC for a block extending `parent` commits: the root hash of
/// `parent`'s own parent when the two are consecutive. It is read from `parent`'s QC,
/// so every validator computes it without any lookup.
pub(crate) fn commit_hash(parent: &ExecutedBlock) -> Option<Sha256> {
    let qc = &parent.block.as_ref()?.qc;
    (qc.round().next() == parent.round()).then_some(qc.vote_info.current_root_hash)
}

#[derive(Debug)]
pub(crate) struct BlockTree {
    store: BlockStore,
    committed: CommittedHead,
    /// Uncommitted blocks, by round.
    blocks: BTreeMap<RoundNumber, ExecutedBlock>,
    high_qc: QuorumCert,
}

impl BlockTree {
    /// Loads the committed head and the certified blocks above it. A store that cannot
    /// be read or decoded is an error.
    pub(crate) fn load(store: BlockStore, genesis: &ExecutedBlock) -> anyhow::Result<Self> {
        store.init(genesis).context("init()")?;
        let committed = store
            .committed_head()?
            .context("committed head missing from an initialized store")?;
        let high_qc = committed
            .block
            .qc
            .clone()
            .context("committed block without QC")?;
        let mut this = Self {
            store,
            committed,
            blocks: BTreeMap::new(),
            high_qc,
        };
        let stored = this.store.blocks_from(this.committed.round().next())?;
        for block in stored {
            let qc = block
                .qc
                .clone()
                .with_context(|| format!("stored block {} without QC", block.round()))?;
            // Certified forks that the committed chain abandoned.
            if this.parent_of(&block).is_none() {
                tracing::warn!(
                    "RootBFT replica - Dropping stored block {} that does not extend the chain",
                    block.round()
                );
                continue;
            }
            if qc.round() > this.high_qc.round() {
                this.high_qc = qc;
            }
            this.blocks.insert(block.round(), block);
        }
        tracing::info!(
            "RootBFT replica - Loaded block tree: committed round {}, {} certified blocks, high QC round {}",
            this.committed.round(),
            this.blocks.len(),
            this.high_qc.round()
        );
        Ok(this)
    }

    pub(crate) fn committed(&self) -> &CommittedHead {
        &self.committed
    }

    pub(crate) fn high_qc(&self) -> &QuorumCert {
        &self.high_qc
    }

    /// Block of the given round, committed head included.
    pub(crate) fn block_at(&self, round: RoundNumber) -> Option<&ExecutedBlock> {
        if round == self.committed.round() {
            return Some(&self.committed.block);
        }
        self.blocks.get(&round)
    }

    /// Block with the given round and hash.
    pub(crate) fn get(&self, round: RoundNumber, hash: BlockHash) -> Option<&ExecutedBlock> {
        self.block_at(round).filter(|b| b.hash() == hash)
    }

    /// Block certified by `qc`.
    pub(crate) fn certified_block(&self, qc: &QuorumCert) -> Option<&ExecutedBlock> {
        self.get(qc.round(), qc.block_hash())
    }

    /// Parent of the block; `None` for the committed head or an unknown parent.
    pub(crate) fn parent_of(&self, block: &ExecutedBlock) -> Option<&ExecutedBlock> {
        self.certified_block(&block.block.as_ref()?.qc)
    }

    /// Shards with an IR change in the uncommitted blocks from `tip` down to the
    /// committed head.
    pub(crate) fn pipeline(&self, tip: &ExecutedBlock) -> BTreeSet<ShardKey> {
        let mut shards = BTreeSet::new();
        let mut block = Some(tip);
        while let Some(b) = block.filter(|b| b.round() > self.committed.round()) {
            if let Some(data) = &b.block {
                shards.extend(data.payload.requests.iter().map(|c| c.shard_key()));
            }
            block = self.parent_of(b);
        }
        shards
    }

    /// Adds an executed block whose parent is in the tree.
    pub(crate) fn add(&mut self, block: ExecutedBlock) {
        self.blocks.entry(block.round()).or_insert(block);
    }

    /// Records a verified QC: the certified block is persisted and the commit rule is
    /// applied. Returns the commit, if the QC produced one.
    pub(crate) fn insert_qc(&mut self, qc: &QuorumCert) -> Result<Option<Commit>, BlockTreeError> {
        if qc.round() <= self.committed.round() {
            return Ok(None);
        }
        let missing = || BlockTreeError::MissingBlock {
            round: qc.round(),
            hash: qc.block_hash(),
        };
        let block = self.certified_block(qc).ok_or_else(missing)?;
        if block.qc.is_some() {
            return Ok(None);
        }
        let parent = self.parent_of(block).ok_or_else(missing)?;
        if qc.commit_hash() != commit_hash(parent) {
            return Err(BlockTreeError::CommitHashMismatch);
        }
        // Committed when `parent` is consecutive to its own parent, which is then
        // the block to commit.
        let to_commit = match &parent.block {
            Some(data) if data.qc.round().next() == parent.round() => Some(data.qc.clone()),
            _ => None,
        };

        let Some(block) = self.blocks.get_mut(&qc.round()) else {
            return Err(missing());
        };
        block.qc = Some(qc.clone());
        self.store.store_block(block).context("store_block()")?;
        if qc.round() > self.high_qc.round() {
            self.high_qc = qc.clone();
        }

        match to_commit {
            Some(block_qc) if block_qc.round() > self.committed.round() => {
                if self.certified_block(&block_qc).is_none() {
                    return Err(BlockTreeError::MissingBlock {
                        round: block_qc.round(),
                        hash: block_qc.block_hash(),
                    });
                }
                Ok(Some(self.commit(block_qc, qc)?))
            }
            _ => Ok(None),
        }
    }

    /// Commits the block certified by `block_qc` with the seal of `commit_qc`.
    fn commit(&mut self, block_qc: QuorumCert, commit_qc: &QuorumCert) -> anyhow::Result<Commit> {
        let round = block_qc.round();
        let mut path = vec![];
        let mut block = self.blocks.get(&round);
        while let Some(b) = block.filter(|b| b.round() > self.committed.round()) {
            path.push(b.clone());
            block = self.parent_of(b);
        }
        path.reverse();
        let head_block = path.last_mut().context("empty commit path")?;
        head_block.qc.get_or_insert(block_qc);
        let head_block = head_block.clone();

        let tree = head_block.state.unicity_tree();
        let changed: BTreeSet<ShardKey> = path.iter().flat_map(|b| b.changed.clone()).collect();
        let mut head = CommittedHead {
            block: head_block,
            commit_qc: Some(commit_qc.clone()),
            certificates: self.committed.certificates.clone(),
        };
        let mut certificates = vec![];
        for shard in changed {
            let input_record = head
                .block
                .state
                .get(&shard)
                .with_context(|| format!("changed shard {shard} missing from state"))?
                .clone();
            let tree_certificate = tree
                .certificate(&shard)
                .with_context(|| format!("changed shard {shard} missing from unicity tree"))?;
            let uc = UnicityCertificate {
                input_record,
                tree_certificate,
                seal: commit_qc.ledger_commit_info.clone(),
            };
            head.certificates.insert(shard, uc.clone());
            certificates.push(uc);
        }

        let mut pruned: Vec<RoundNumber> = self.blocks.range(..round).map(|(r, _)| *r).collect();
        if self.committed.round() != RoundNumber::GENESIS {
            pruned.push(self.committed.round());
        }
        // Only descendants of the new head stay above it.
        let mut blocks = BTreeMap::new();
        let mut descendants = BTreeSet::from([head.block.hash()]);
        for (r, b) in self.blocks.range(round.next()..) {
            match &b.block {
                Some(data) if descendants.contains(&data.qc.block_hash()) => {
                    descendants.insert(b.hash());
                    blocks.insert(*r, b.clone());
                }
                _ => pruned.push(*r),
            }
        }
        self.store.commit(&head, &pruned).context("commit()")?;
        self.blocks = blocks;
        self.committed = head.clone();
        Ok(Commit {
            head,
            blocks: path,
            certificates,
        })
    }

    /// Committed head and the certified blocks above it.
    pub(crate) fn state_msg(&self) -> StateMsg {
        StateMsg {
            committed_head: self.committed.clone(),
            blocks: self
                .blocks
                .values()
                .filter(|b| b.qc.is_some())
                .cloned()
                .collect(),
        }
    }

    /// Replaces the whole tree with a verified state of a peer.
    pub(crate) fn reset(&mut self, state: StateMsg) -> anyhow::Result<()> {
        self.store
            .reset(&state.committed_head, &state.blocks)
            .context("reset()")?;
        self.high_qc = state
            .blocks
            .last()
            .unwrap_or(&state.committed_head.block)
            .qc
            .clone()
            .context("certified block without QC")?;
        self.committed = state.committed_head;
        self.blocks = state.blocks.into_iter().map(|b| (b.round(), b)).collect();
        Ok(())
    }
}
