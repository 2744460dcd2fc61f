//! Metrics for the consensus module.

use std::time::Duration;

use vise::{Buckets, Counter, EncodeLabelSet, EncodeLabelValue, Family, Gauge, Histogram, Metrics, Unit};

/// Label for an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum RootMsgLabel {
    /// Label for a `Proposal` message.
    Proposal,
    /// Label for a `Vote` message.
    Vote,
    /// Label for a `Timeout` message.
    Timeout,
    /// Label for a `StateRequest` message.
    StateRequest,
    /// Label for a `StateResponse` message.
    StateResponse,
    /// Label for an `IrChangeRequest` message.
    IrChangeRequest,
    /// Label for a `BlockCertificationRequest` message.
    CertificationRequest,
}

impl RootMsgLabel {
    /// Attaches a result to this label.
    pub(crate) fn with_result<E>(self, result: &Result<(), E>) -> ProcessingLatencyLabels {
        ProcessingLatencyLabels {
            r#type: self,
            result: match result {
                Ok(()) => ResultLabel::Ok,
                Err(_) => ResultLabel::Err,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
enum ResultLabel {
    Ok,
    Err,
}

/// Labels for processing latency metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct ProcessingLatencyLabels {
    r#type: RootMsgLabel,
    result: ResultLabel,
}

/// Metrics defined by the consensus module.
#[derive(Debug, Metrics)]
#[metrics(prefix = "rootchain_bft")]
pub(crate) struct RootBftMetrics {
    /// Current round of the replica.
    pub(crate) round: Gauge<u64>,
    /// Round of the last committed block.
    pub(crate) committed_round: Gauge<u64>,
    /// Number of unicity certificates issued.
    pub(crate) certificates_issued: Counter,
    /// Number of rounds the replica timed out in.
    pub(crate) timeouts: Counter,
    /// Number of state sync requests sent.
    pub(crate) state_sync_requests: Counter,
    /// Number of shard changes in the proposed blocks.
    #[metrics(buckets = Buckets::linear(0.0..=64.0, 8.0))]
    pub(crate) proposal_payload_size: Histogram<usize>,
    /// Latency of receiving a proposal as observed by the replica. Measures from
    /// the start of the round until we have a verified proposal.
    #[metrics(buckets = Buckets::exponential(0.125..=64.0, 2.0), unit = Unit::Seconds)]
    pub(crate) proposal_latency: Histogram<Duration>,
    /// Latency of a single round as observed by the replica. Measures from
    /// the start of the round until the start of the next.
    #[metrics(buckets = Buckets::exponential(0.125..=64.0, 2.0), unit = Unit::Seconds)]
    pub(crate) round_latency: Histogram<Duration>,
    /// Latency of processing messages by the replicas.
    #[metrics(buckets = Buckets::LATENCIES, unit = Unit::Seconds)]
    pub(crate) message_processing_latency: Family<ProcessingLatencyLabels, Histogram<Duration>>,
}

/// Global instance of [`RootBftMetrics`].
#[vise::register]
pub(crate) static METRICS: vise::Global<RootBftMetrics> = vise::Global::new();
