//! Validation and execution of block payloads against the root state.
use rootchain_certification::Aggregator;
use rootchain_roles::{
    shard::{InputRecord, ShardKey},
    validator::{
        BlockData, CertReqReason, ExecutedBlock, IrChangeRequest, IrChangeRequestVerifyError,
        RoundNumber,
    },
};
use std::collections::BTreeSet;

use crate::Config;

/// Error returned when an IR change cannot be applied on top of a block.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PayloadError {
    /// The shard already has a change in an uncommitted ancestor.
    #[error("shard {0} already has a change in the pipeline")]
    InPipeline(ShardKey),
    /// The change is for a shard round that is already certified.
    #[error("shard {shard} round {round} is not above the certified round {certified}")]
    Old {
        shard: ShardKey,
        round: u64,
        certified: u64,
    },
    /// The input record does not extend the certified one.
    #[error("shard {0}: previous hash does not match the certified state hash")]
    HashChainMismatch(ShardKey),
    /// A T2 timeout for a shard that has no record or was certified recently.
    #[error("shard {shard} certified at round {certified_at} has not timed out at round {round}")]
    NotTimedOut {
        shard: ShardKey,
        certified_at: RoundNumber,
        round: RoundNumber,
    },
    /// The change or its proof is invalid.
    #[error("shard {shard}: {source:#}")]
    Invalid {
        shard: ShardKey,
        source: rootchain_certification::Error,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PayloadError {
    fn certification(shard: ShardKey, err: rootchain_certification::Error) -> Self {
        if err.is_internal() {
            Self::Internal(err.into())
        } else {
            Self::Invalid { shard, source: err }
        }
    }
}

/// Whether the shard, last certified in `parent`'s state, has to be certified again
/// in a block of `round`.
pub(crate) fn t2_timed_out(
    cfg: &Config,
    parent: &ExecutedBlock,
    round: RoundNumber,
    shard: &ShardKey,
) -> Result<bool, PayloadError> {
    let Some(certified) = parent.state.get(shard) else {
        return Ok(false);
    };
    let shard_cfg = cfg
        .orchestration
        .shard_config_for_round(shard, certified.round_number)
        .map_err(|err| PayloadError::certification(*shard, err.into()))?;
    let certified_at = parent.state.certified_at(shard);
    Ok(round.0 >= certified_at.0 + cfg.t2_rounds(shard_cfg.t2_timeout()))
}

/// Checks that `change` can be applied on top of `parent` in a block of `round`, where
/// `pipeline` holds the shards changed by the uncommitted blocks up to `parent`.
/// Returns the input record to certify, or `None` when the change records that no
/// quorum is possible.
pub(crate) fn check_change(
    cfg: &Config,
    aggregator: &Aggregator,
    parent: &ExecutedBlock,
    pipeline: &BTreeSet<ShardKey>,
    round: RoundNumber,
    change: &IrChangeRequest,
) -> Result<Option<InputRecord>, PayloadError> {
    let shard = change.shard_key();
    if pipeline.contains(&shard) {
        return Err(PayloadError::InPipeline(shard));
    }
    if change.reason == CertReqReason::T2Timeout {
        if !change.requests.is_empty() {
            let err = IrChangeRequestVerifyError::UnexpectedRequests;
            return Err(PayloadError::certification(shard, err.into()));
        }
        if !t2_timed_out(cfg, parent, round, &shard)? {
            return Err(PayloadError::NotTimedOut {
                shard,
                certified_at: parent.state.certified_at(&shard),
                round,
            });
        }
        // The last certified record is certified again.
        return Ok(parent.state.get(&shard).cloned());
    }
    let ir = aggregator
        .verify_change(change)
        .map_err(|err| PayloadError::certification(shard, err))?;
    let Some(certified) = parent.state.get(&shard) else {
        return Ok(ir);
    };
    let round = change.round().unwrap_or_default();
    if round <= certified.round_number {
        return Err(PayloadError::Old {
            shard,
            round,
            certified: certified.round_number,
        });
    }
    if let Some(ir) = &ir {
        if ir.previous_hash != certified.hash {
            return Err(PayloadError::HashChainMismatch(shard));
        }
    }
    Ok(ir)
}

/// Executes a proposed block on top of `parent`. `Quorum` changes update the root
/// state; `T2Timeout` changes recertify the current record.
pub(crate) fn execute(
    cfg: &Config,
    aggregator: &Aggregator,
    parent: &ExecutedBlock,
    pipeline: &BTreeSet<ShardKey>,
    block: BlockData,
) -> Result<ExecutedBlock, PayloadError> {
    let mut changes = vec![];
    for change in &block.payload.requests {
        if let Some(ir) = check_change(cfg, aggregator, parent, pipeline, block.round, change)? {
            changes.push((change.shard_key(), ir));
        }
    }
    Ok(ExecutedBlock::new(block, &parent.state, changes))
}
