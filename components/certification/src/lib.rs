//! Certification aggregator.
//!
//! Collects block certification requests from shard validators and decides, per shard
//! round, whether an input record reached quorum of the shard trust base or whether a
//! quorum is no longer possible. Each shard is aggregated independently behind its own
//! lock, so one shard never blocks another.
//!
//! A decision stays pending until a root block including it commits. While pending, no
//! further requests of the shard are accepted.
use rootchain_crypto::sha256::Sha256;
use rootchain_orchestration::{Orchestration, OrchestrationError};
use rootchain_roles::{
    shard::{BlockCertificationRequest, CertificationRequestVerifyError, InputRecord, ShardKey},
    validator::{
        CertReqReason, EpochNumber, IrChangeRequest, IrChangeRequestVerifyError, PublicKey,
        RootState, TrustBase,
    },
};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard},
};

mod metrics;
#[cfg(test)]
mod tests;

use metrics::METRICS;

/// Error returned by the aggregator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The shard round is already certified.
    #[error("old shard round {round}, last certified round {certified}")]
    Old {
        /// Round of the request.
        round: u64,
        /// Last certified round of the shard.
        certified: u64,
    },
    /// The shard has a decision that is not committed yet.
    #[error("shard {shard} has a pending decision for round {round}")]
    DecisionPending {
        /// The shard.
        shard: ShardKey,
        /// Round of the pending decision.
        round: u64,
    },
    /// No usable shard configuration.
    #[error("shard configuration: {0:#}")]
    Config(#[from] OrchestrationError),
    /// The input record was produced under another epoch than the active one.
    #[error("input record epoch {got} differs from active epoch {want}")]
    WrongEpoch {
        /// Epoch of the input record.
        got: EpochNumber,
        /// Active epoch of the shard.
        want: EpochNumber,
    },
    /// Invalid certification request.
    #[error("invalid certification request: {0:#}")]
    InvalidRequest(#[from] CertificationRequestVerifyError),
    /// Invalid decision.
    #[error("invalid ir change request: {0:#}")]
    InvalidChange(#[from] IrChangeRequestVerifyError),
    /// The input record does not extend the last certified one.
    #[error("previous hash does not match the last certified state hash")]
    HashChainMismatch,
}

impl Error {
    /// Whether the error is caused by a storage failure rather than by the input.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Config(OrchestrationError::Internal(_)))
    }
}

/// Aggregation state of a single shard.
#[derive(Debug, Default)]
struct ShardState {
    /// Last certified input record.
    certified: Option<InputRecord>,
    /// Collected requests by shard round, at most one per validator.
    requests: BTreeMap<u64, BTreeMap<PublicKey, BlockCertificationRequest>>,
    /// Decision waiting for commit.
    pending: Option<IrChangeRequest>,
}

impl ShardState {
    /// Checks that a record for `round` may still be certified.
    fn check_round(&self, shard: ShardKey, round: u64) -> Result<(), Error> {
        if let Some(certified) = &self.certified {
            if round <= certified.round_number {
                return Err(Error::Old {
                    round,
                    certified: certified.round_number,
                });
            }
        }
        if let Some(pending) = &self.pending {
            return Err(Error::DecisionPending {
                shard,
                round: pending.round().unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn check_extends(&self, ir: &InputRecord) -> Result<(), Error> {
        match &self.certified {
            Some(certified) if certified.hash != ir.previous_hash => Err(Error::HashChainMismatch),
            _ => Ok(()),
        }
    }

    /// Drops everything that the certified record made obsolete.
    fn set_certified(&mut self, ir: &InputRecord) {
        self.requests = self.requests.split_off(&ir.round_number.saturating_add(1));
        if self
            .pending
            .as_ref()
            .and_then(IrChangeRequest::round)
            .is_some_and(|round| round <= ir.round_number)
        {
            self.pending = None;
        }
        self.certified = Some(ir.clone());
    }

    fn decide(&mut self, change: IrChangeRequest) -> IrChangeRequest {
        if let Some(round) = change.round() {
            self.requests.remove(&round);
        }
        METRICS.decisions[&metrics::DecisionLabels {
            reason: change.reason.into(),
        }]
            .inc();
        self.pending = Some(change.clone());
        change
    }
}

fn lock(state: &Mutex<ShardState>) -> MutexGuard<'_, ShardState> {
    state.lock().expect("lock is poisoned")
}

/// Outcome of tallying the requests of one shard round.
fn tally(
    shard: ShardKey,
    trust_base: &TrustBase,
    requests: &BTreeMap<PublicKey, BlockCertificationRequest>,
) -> Option<IrChangeRequest> {
    // input record hash -> supporting requests and their weight
    let mut votes: BTreeMap<Sha256, (u64, Vec<&BlockCertificationRequest>)> = BTreeMap::new();
    let mut submitted = 0;
    for req in requests.values() {
        let weight = trust_base.weight(&req.node_id).unwrap_or(0);
        submitted += weight;
        let entry = votes.entry(req.input_record.hash()).or_default();
        entry.0 += weight;
        entry.1.push(req);
    }
    let (best_weight, best) = votes.values().max_by_key(|(weight, _)| *weight)?;
    let quorum = trust_base.quorum_threshold();
    let make = |reason, requests: Vec<BlockCertificationRequest>| IrChangeRequest {
        partition: shard.partition,
        shard: shard.shard,
        reason,
        requests,
    };
    if *best_weight >= quorum {
        return Some(make(
            CertReqReason::Quorum,
            best.iter().map(|r| (*r).clone()).collect(),
        ));
    }
    let missing = trust_base.total_weight().saturating_sub(submitted);
    if best_weight + missing < quorum {
        return Some(make(
            CertReqReason::QuorumNotPossible,
            requests.values().cloned().collect(),
        ));
    }
    None
}

/// Certification aggregator over all shards known to the orchestration.
///
/// Nothing panics while holding one of its locks, so a poisoned lock is a bug and
/// locking panics on it.
pub struct Aggregator {
    orchestration: Arc<Orchestration>,
    shards: RwLock<BTreeMap<ShardKey, Arc<Mutex<ShardState>>>>,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Aggregator")
            .field("shards", &self.read().len())
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Constructs an aggregator with the given certified root state.
    pub fn new(orchestration: Arc<Orchestration>, state: &RootState) -> Self {
        let this = Self {
            orchestration,
            shards: RwLock::default(),
        };
        this.reset(state);
        this
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ShardKey, Arc<Mutex<ShardState>>>> {
        self.shards.read().expect("lock is poisoned")
    }

    fn shard(&self, shard: ShardKey) -> Arc<Mutex<ShardState>> {
        if let Some(state) = self.read().get(&shard) {
            return state.clone();
        }
        self.shards
            .write()
            .expect("lock is poisoned")
            .entry(shard)
            .or_default()
            .clone()
    }

    /// Trust base of the shard for the round of `ir`, checking that `ir` was produced
    /// in the active epoch.
    fn trust_base(&self, shard: &ShardKey, ir: &InputRecord) -> Result<TrustBase, Error> {
        let cfg = self
            .orchestration
            .shard_config_for_round(shard, ir.round_number)?;
        if cfg.epoch != ir.epoch {
            return Err(Error::WrongEpoch {
                got: ir.epoch,
                want: cfg.epoch,
            });
        }
        Ok(cfg.trust_base.clone())
    }

    /// Adds a certification request. Returns the decision for the shard round if this
    /// request completed it.
    pub fn add_request(
        &self,
        req: BlockCertificationRequest,
    ) -> Result<Option<IrChangeRequest>, Error> {
        let res = self.add_request_inner(req);
        match &res {
            Ok(_) => METRICS.requests_accepted.inc(),
            Err(_) => METRICS.requests_rejected.inc(),
        };
        res
    }

    fn add_request_inner(
        &self,
        req: BlockCertificationRequest,
    ) -> Result<Option<IrChangeRequest>, Error> {
        let shard = req.shard_key();
        let trust_base = self.trust_base(&shard, &req.input_record)?;
        req.verify(&trust_base)?;

        let state = self.shard(shard);
        let mut state = lock(&state);
        let round = req.round();
        state.check_round(shard, round)?;
        state.check_extends(&req.input_record)?;
        tracing::trace!(
            "Aggregator - shard {shard} round {round}: request from {}",
            req.node_id
        );
        let requests = state.requests.entry(round).or_default();
        requests.insert(req.node_id, req);
        let Some(change) = tally(shard, &trust_base, requests) else {
            return Ok(None);
        };
        tracing::info!(
            "Aggregator - shard {shard} round {round}: decided {:?}",
            change.reason
        );
        Ok(Some(state.decide(change)))
    }

    /// Verifies a decision against the shard configuration active in its round.
    /// Returns the certified input record for `Quorum` and `None` for
    /// `QuorumNotPossible`.
    pub fn verify_change(&self, change: &IrChangeRequest) -> Result<Option<InputRecord>, Error> {
        let first = change
            .requests
            .first()
            .ok_or(IrChangeRequestVerifyError::NoRequests)?;
        let trust_base = self.trust_base(&change.shard_key(), &first.input_record)?;
        Ok(change.verify(&trust_base)?)
    }

    /// Adds a decision made by another root validator. Adding the pending decision
    /// again is a no-op.
    pub fn add_decision(&self, change: IrChangeRequest) -> Result<(), Error> {
        let ir = self.verify_change(&change)?;
        let shard = change.shard_key();
        let round = change.round().unwrap_or_default();

        let state = self.shard(shard);
        let mut state = lock(&state);
        if state.pending.as_ref() == Some(&change) {
            return Ok(());
        }
        state.check_round(shard, round)?;
        if let Some(ir) = &ir {
            state.check_extends(ir)?;
        }
        tracing::debug!("Aggregator - shard {shard} round {round}: adopted forwarded decision");
        state.decide(change);
        Ok(())
    }

    /// Decisions waiting for commit, ordered by shard.
    pub fn pending(&self) -> Vec<IrChangeRequest> {
        let shards: Vec<_> = self.read().values().cloned().collect();
        shards.iter().filter_map(|s| lock(s).pending.clone()).collect()
    }

    /// Notifies the aggregator that a decision for the shard round was committed.
    /// `certified` is the new input record for `Quorum`, and `None` for
    /// `QuorumNotPossible`, after which the shard may submit the round again.
    pub fn on_commit(&self, shard: ShardKey, round: u64, certified: Option<&InputRecord>) {
        let state = self.shard(shard);
        let mut state = lock(&state);
        match certified {
            Some(ir) => state.set_certified(ir),
            None => {
                if state
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.round() == Some(round))
                {
                    state.pending = None;
                }
                state.requests.remove(&round);
            }
        }
    }

    /// Replaces the certified records with `state`, dropping decisions and requests
    /// that it made obsolete. Used at startup and after state sync.
    ///
    /// `QuorumNotPossible` decisions are dropped as well: whether they were committed
    /// is not visible in the state, and the shard resubmits its requests either way.
    pub fn reset(&self, state: &RootState) {
        for shard in state.records.keys() {
            self.shard(*shard);
        }
        let shards: Vec<_> = self
            .read()
            .iter()
            .map(|(shard, s)| (*shard, s.clone()))
            .collect();
        for (shard, shard_state) in shards {
            let mut shard_state = lock(&shard_state);
            if let Some(ir) = state.get(&shard) {
                shard_state.set_certified(ir);
            }
            if shard_state
                .pending
                .as_ref()
                .is_some_and(|p| p.reason == CertReqReason::QuorumNotPossible)
            {
                shard_state.pending = None;
            }
        }
    }

    /// Last certified input record of the shard.
    pub fn certified(&self, shard: &ShardKey) -> Option<InputRecord> {
        let state = self.read().get(shard)?.clone();
        let certified = lock(&state).certified.clone();
        certified
    }
}
