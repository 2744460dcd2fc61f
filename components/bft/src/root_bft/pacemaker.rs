//! Round controller. Owns the current round, its timer and the timeout certificates
//! being collected.
use crate::metrics::METRICS;
use rootchain_roles::validator::{
    QuorumCert, RoundNumber, TimeoutCert, TimeoutCertAddError, TimeoutMsg, TrustBase,
};
use std::{collections::BTreeMap, time::Duration};
use tokio::time::Instant;

/// Result of adding a timeout message.
#[derive(Debug)]
pub(crate) enum TimeoutStatus {
    /// Not enough weight yet.
    Collecting {
        /// Weight of the timeouts for the round collected so far.
        weight: u64,
    },
    /// The timeouts formed a TC.
    Certified(TimeoutCert),
}

#[derive(Debug)]
pub(crate) struct Pacemaker {
    round: RoundNumber,
    round_timeout: Duration,
    /// Start of the current round. Used for metrics and block rate.
    round_start: Instant,
    /// When the round, or our timeout message for it, times out.
    deadline: Instant,
    /// TC through which we entered the current round, if any.
    last_tc: Option<TimeoutCert>,
    /// Our timeout message for the current round, rebroadcast until the round ends.
    timeout_msg: Option<TimeoutMsg>,
    /// TCs being collected, by round.
    pending_tcs: BTreeMap<RoundNumber, TimeoutCert>,
}

impl Pacemaker {
    pub(crate) fn new(round: RoundNumber, round_timeout: Duration) -> Self {
        let now = Instant::now();
        METRICS.round.set(round.0);
        Self {
            round,
            round_timeout,
            round_start: now,
            deadline: now + round_timeout,
            last_tc: None,
            timeout_msg: None,
            pending_tcs: BTreeMap::new(),
        }
    }

    pub(crate) fn round(&self) -> RoundNumber {
        self.round
    }

    pub(crate) fn round_start(&self) -> Instant {
        self.round_start
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn last_tc(&self) -> Option<&TimeoutCert> {
        self.last_tc.as_ref()
    }

    pub(crate) fn timeout_msg(&self) -> Option<&TimeoutMsg> {
        self.timeout_msg.as_ref()
    }

    /// Advances past the round certified by `qc`. Returns whether the round changed.
    pub(crate) fn advance_with_qc(&mut self, qc: &QuorumCert) -> bool {
        if qc.round() < self.round {
            return false;
        }
        self.last_tc = None;
        self.start_round(qc.round().next());
        true
    }

    /// Advances past the round timed out by `tc`. Returns whether the round changed.
    pub(crate) fn advance_with_tc(&mut self, tc: &TimeoutCert) -> bool {
        if tc.round() < self.round {
            return false;
        }
        self.last_tc = Some(tc.clone());
        self.start_round(tc.round().next());
        true
    }

    fn start_round(&mut self, round: RoundNumber) {
        let now = Instant::now();
        METRICS.round_latency.observe(now - self.round_start);
        METRICS.round.set(round.0);
        self.round = round;
        self.round_start = now;
        self.deadline = now + self.round_timeout;
        self.timeout_msg = None;
        self.pending_tcs.clear();
    }

    /// Adds a verified timeout message for the current round. Timeouts of other rounds
    /// are not collected.
    pub(crate) fn add_timeout(
        &mut self,
        msg: &TimeoutMsg,
        trust_base: &TrustBase,
    ) -> Result<TimeoutStatus, TimeoutCertAddError> {
        let round = msg.round();
        if round != self.round {
            return Err(TimeoutCertAddError::InconsistentTimeouts);
        }
        let tc = self
            .pending_tcs
            .entry(round)
            .or_insert_with(|| TimeoutCert::new(msg.timeout.clone()));
        tc.add(msg)?;
        let weight = tc
            .signatures
            .keys()
            .filter_map(|key| trust_base.weight(key))
            .sum();
        if weight < trust_base.quorum_threshold() {
            return Ok(TimeoutStatus::Collecting { weight });
        }
        let tc = tc.clone();
        self.pending_tcs.remove(&round);
        Ok(TimeoutStatus::Certified(tc))
    }

    /// Records our timeout message for the current round and rearms the timer for
    /// its rebroadcast.
    pub(crate) fn set_timeout_msg(&mut self, msg: TimeoutMsg) {
        self.timeout_msg = Some(msg);
        self.rearm();
    }

    /// Restarts the timer without changing the round.
    pub(crate) fn rearm(&mut self) {
        self.deadline = Instant::now() + self.round_timeout;
    }

    #[cfg(test)]
    pub(crate) fn pending_tc_rounds(&self) -> Vec<RoundNumber> {
        self.pending_tcs.keys().copied().collect()
    }
}
