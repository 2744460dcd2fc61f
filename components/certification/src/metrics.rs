//! Metrics for the certification aggregator.

use rootchain_roles::validator::CertReqReason;
use vise::{Counter, EncodeLabelSet, EncodeLabelValue, Family, Metrics};

/// Label for the reason of an aggregator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum ReasonLabel {
    Quorum,
    QuorumNotPossible,
    T2Timeout,
}

impl From<CertReqReason> for ReasonLabel {
    fn from(reason: CertReqReason) -> Self {
        match reason {
            CertReqReason::Quorum => Self::Quorum,
            CertReqReason::QuorumNotPossible => Self::QuorumNotPossible,
            CertReqReason::T2Timeout => Self::T2Timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct DecisionLabels {
    pub(crate) reason: ReasonLabel,
}

/// Metrics defined by the certification aggregator.
#[derive(Debug, Metrics)]
#[metrics(prefix = "rootchain_certification")]
pub(crate) struct CertificationMetrics {
    /// Certification requests accepted.
    pub(crate) requests_accepted: Counter,
    /// Certification requests rejected.
    pub(crate) requests_rejected: Counter,
    /// Decisions made, by reason.
    pub(crate) decisions: Family<DecisionLabels, Counter>,
}

/// Global instance of [`CertificationMetrics`].
#[vise::register]
pub(crate) static METRICS: vise::Global<CertificationMetrics> = vise::Global::new();
