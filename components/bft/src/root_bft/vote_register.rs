//! Incremental aggregation of votes into quorum certificates.
use rootchain_crypto::sha256::Sha256;
use rootchain_roles::validator::{
    PublicKey, QuorumCert, QuorumCertAddError, RoundNumber, TrustBase, Vote,
};
use std::collections::BTreeMap;

/// Error returned by `VoteRegister::insert()`.
#[derive(Debug, thiserror::Error)]
pub(crate) enum VoteRegisterError {
    /// Same vote received before.
    #[error("duplicate vote")]
    Duplicate,
    /// The author already voted for different content in the round.
    #[error("equivocating vote from {author:?}")]
    Equivocation { author: PublicKey },
    #[error(transparent)]
    Add(#[from] QuorumCertAddError),
}

#[derive(Debug, Default)]
pub(crate) struct VoteRegister {
    /// First vote content of every author, by round.
    authors: BTreeMap<RoundNumber, BTreeMap<PublicKey, Sha256>>,
    /// Partial QCs, by round and vote content.
    qcs: BTreeMap<RoundNumber, BTreeMap<Sha256, QuorumCert>>,
}

impl VoteRegister {
    /// Adds a verified vote. Returns the QC once the votes for its content reach quorum.
    /// Only the first vote of an author in a round is counted.
    pub(crate) fn insert(
        &mut self,
        vote: &Vote,
        trust_base: &TrustBase,
    ) -> Result<Option<QuorumCert>, VoteRegisterError> {
        let round = vote.round();
        let content = vote.content_hash();
        let authors = self.authors.entry(round).or_default();
        if let Some(prev) = authors.get(&vote.author) {
            if *prev == content {
                return Err(VoteRegisterError::Duplicate);
            }
            return Err(VoteRegisterError::Equivocation {
                author: vote.author,
            });
        }
        authors.insert(vote.author, content);

        let qc = self
            .qcs
            .entry(round)
            .or_default()
            .entry(content)
            .or_insert_with(|| QuorumCert::new(vote));
        qc.add(vote)?;
        let weight: u64 = qc
            .signatures()
            .keys()
            .filter_map(|key| trust_base.weight(key))
            .sum();
        if weight < trust_base.quorum_threshold() {
            return Ok(None);
        }
        let qc = qc.clone();
        self.qcs.remove(&round);
        Ok(Some(qc))
    }

    /// Drops everything below `round`.
    pub(crate) fn prune(&mut self, round: RoundNumber) {
        self.authors = self.authors.split_off(&round);
        self.qcs = self.qcs.split_off(&round);
    }

    #[cfg(test)]
    pub(crate) fn rounds(&self) -> Vec<RoundNumber> {
        let rounds: std::collections::BTreeSet<_> =
            self.authors.keys().chain(self.qcs.keys()).copied().collect();
        rounds.into_iter().collect()
    }
}
