use super::*;
use crate::shard::testonly::ShardSetup;
use assert_matches::assert_matches;
use rand::{seq::SliceRandom as _, Rng as _};
use test_casing::test_casing;

#[test]
fn test_quorum_threshold() {
    assert_eq!(quorum_threshold(1), 1);
    assert_eq!(quorum_threshold(3), 3);
    assert_eq!(quorum_threshold(4), 3);
    assert_eq!(quorum_threshold(7), 5);
    assert_eq!(quorum_threshold(10), 7);
    assert_eq!(max_faulty_weight(4), 1);
    assert_eq!(max_faulty_weight(7), 2);
}

#[test]
fn test_trust_base_rejects_invalid_sets() {
    let rng = &mut rand::thread_rng();
    let key: SecretKey = rng.gen();
    let v = WeightedValidator {
        key: key.public(),
        weight: 1,
    };
    assert!(TrustBase::new([], LeaderSelectionMode::Weighted).is_err());
    assert!(TrustBase::new([v.clone(), v.clone()], LeaderSelectionMode::Weighted).is_err());
    let zero = WeightedValidator { weight: 0, ..v };
    assert!(TrustBase::new([zero], LeaderSelectionMode::Weighted).is_err());
}

#[test_casing(2, [LeaderSelectionMode::RoundRobin, LeaderSelectionMode::Weighted])]
#[test]
fn test_leader_is_deterministic(mode: LeaderSelectionMode) {
    let rng = &mut rand::thread_rng();
    let validators: Vec<_> = (0..7)
        .map(|i| WeightedValidator {
            key: rng.gen::<SecretKey>().public(),
            weight: i + 1,
        })
        .collect();
    let trust_bases: Vec<_> = (0..5)
        .map(|_| {
            let mut vs = validators.clone();
            vs.shuffle(rng);
            TrustBase::new(vs, mode).unwrap()
        })
        .collect();
    for r in 0..1000 {
        let round = RoundNumber(r);
        let want = trust_bases[0].leader(round);
        for tb in &trust_bases[1..] {
            assert_eq!(want, tb.leader(round));
        }
    }
}

#[test]
fn test_weighted_leader_follows_weights() {
    let rng = &mut rand::thread_rng();
    let heavy = rng.gen::<SecretKey>().public();
    let light = rng.gen::<SecretKey>().public();
    let tb = TrustBase::new(
        [
            WeightedValidator {
                key: heavy,
                weight: 9,
            },
            WeightedValidator {
                key: light,
                weight: 1,
            },
        ],
        LeaderSelectionMode::Weighted,
    )
    .unwrap();
    let heavy_turns = (0..10_000)
        .filter(|r| tb.leader(RoundNumber(*r)) == heavy)
        .count();
    assert!((8_500..9_500).contains(&heavy_turns), "{heavy_turns}");
}

#[test]
fn test_trust_base_serde() {
    let rng = &mut rand::thread_rng();
    let setup = testonly::Setup::new(rng, 4);
    let json = serde_json::to_string(&setup.trust_base).unwrap();
    let got: TrustBase = serde_json::from_str(&json).unwrap();
    assert_eq!(got, setup.trust_base);
    assert_eq!(got.hash(), setup.trust_base.hash());
}

#[test]
fn test_quorum_cert_verify() {
    let rng = &mut rand::thread_rng();
    let setup = testonly::Setup::new(rng, 4);
    setup.genesis_qc().verify(&setup.trust_base).unwrap();

    let b1 = setup.make_block(RoundNumber(1), &setup.genesis);
    let votes = setup.make_votes(&b1, None);
    let mut qc = QuorumCert::new(&votes[0]);
    for v in &votes[..2] {
        v.verify(&setup.trust_base).unwrap();
        qc.add(v).unwrap();
    }
    assert_matches!(qc.add(&votes[0]), Err(QuorumCertAddError::Exists));
    assert_matches!(
        qc.verify(&setup.trust_base),
        Err(QuorumCertVerifyError::Signatures(_))
    );
    qc.add(&votes[2]).unwrap();
    qc.verify(&setup.trust_base).unwrap();

    // A vote for other content is not added.
    let other = Vote::new(&setup.keys[3], b1.vote_info(), Some(rng.gen()));
    assert_matches!(qc.add(&other), Err(QuorumCertAddError::InconsistentVotes));

    // Tampering with the certified block breaks the QC.
    let mut bad = qc.clone();
    bad.vote_info.block_hash = BlockHash(rng.gen());
    assert_matches!(
        bad.verify(&setup.trust_base),
        Err(QuorumCertVerifyError::VoteInfoHashMismatch)
    );
}

#[test]
fn test_genesis_qc_must_be_unsigned() {
    let rng = &mut rand::thread_rng();
    let setup = testonly::Setup::new(rng, 4);
    let mut qc = setup.genesis_qc();
    let sig = qc.ledger_commit_info.sign(&setup.keys[0]);
    qc.ledger_commit_info
        .signatures
        .insert(setup.keys[0].public(), sig);
    assert_matches!(
        qc.verify(&setup.trust_base),
        Err(QuorumCertVerifyError::BadGenesis)
    );
}

#[test]
fn test_vote_verify() {
    let rng = &mut rand::thread_rng();
    let setup = testonly::Setup::new(rng, 4);
    let b1 = setup.make_block(RoundNumber(1), &setup.genesis);
    let vote = Vote::new(&setup.keys[0], b1.vote_info(), None);
    vote.verify(&setup.trust_base).unwrap();

    let outsider = Vote::new(&rng.gen(), b1.vote_info(), None);
    assert_matches!(
        outsider.verify(&setup.trust_base),
        Err(VoteVerifyError::UnknownAuthor)
    );

    let mut forged = vote.clone();
    forged.ledger_commit_info.hash = Some(rng.gen());
    assert_matches!(
        forged.verify(&setup.trust_base),
        Err(VoteVerifyError::InvalidSignature)
    );
}

#[test]
fn test_timeout_cert() {
    let rng = &mut rand::thread_rng();
    let setup = testonly::Setup::new(rng, 4);
    let b1 = setup.make_block(RoundNumber(1), &setup.genesis);
    let qc1 = setup.make_qc(&b1, None);

    // Two validators know QC(1), two only the genesis QC.
    let mut msgs = setup.make_timeouts(RoundNumber(2), &qc1);
    msgs.truncate(2);
    msgs.extend(
        setup.make_timeouts(RoundNumber(2), &setup.genesis_qc())[2..]
            .iter()
            .cloned(),
    );
    // Timeouts for round 2 with the genesis QC need a TC for round 1.
    assert_matches!(
        msgs[3].verify(&setup.trust_base),
        Err(TimeoutVerifyError::MissingLastTc)
    );
    msgs[0].verify(&setup.trust_base).unwrap();

    let mut tc = TimeoutCert::new(msgs[3].timeout.clone());
    for m in &msgs[1..] {
        tc.add(m).unwrap();
    }
    assert_matches!(tc.add(&msgs[1]), Err(TimeoutCertAddError::Exists));
    assert_eq!(tc.high_qc().round(), RoundNumber(1));
    tc.verify(&setup.trust_base).unwrap();

    // Replacing the high QC with a lower one is detected.
    let mut bad = tc.clone();
    bad.timeout.high_qc = setup.genesis_qc();
    assert_matches!(
        bad.verify(&setup.trust_base),
        Err(TimeoutCertVerifyError::HighQcMismatch)
    );

    // Not enough signers.
    let mut small = TimeoutCert::new(msgs[0].timeout.clone());
    small.add(&msgs[0]).unwrap();
    small.add(&msgs[1]).unwrap();
    assert_matches!(
        small.verify(&setup.trust_base),
        Err(TimeoutCertVerifyError::Signers(TrustBaseError::NotEnoughWeight { .. }))
    );
}

#[test]
fn test_proposal_verify() {
    let rng = &mut rand::thread_rng();
    let setup = testonly::Setup::new(rng, 4);
    let b1 = setup.make_block(RoundNumber(1), &setup.genesis);
    setup
        .make_proposal(&b1, None)
        .verify(&setup.trust_base)
        .unwrap();

    // Round 2 skipped: the proposal for round 3 extends the genesis QC and needs TC(2).
    let b3 = setup.make_block(RoundNumber(3), &setup.genesis);
    assert_matches!(
        setup.make_proposal(&b3, None).verify(&setup.trust_base),
        Err(ProposalVerifyError::MissingTc)
    );
    let tc1 = setup.make_tc(RoundNumber(1), &setup.genesis_qc());
    assert_matches!(
        setup
            .make_proposal(&b3, Some(tc1))
            .verify(&setup.trust_base),
        Err(ProposalVerifyError::BadTcRound)
    );
    let tc2 = setup.make_tc(RoundNumber(2), &setup.genesis_qc());
    setup
        .make_proposal(&b3, Some(tc2))
        .verify(&setup.trust_base)
        .unwrap();

    // Signature of someone else.
    let mut p = setup.make_proposal(&b1, None);
    p.signature = setup.keys[0].sign_hash(&rng.gen());
    assert_matches!(
        p.verify(&setup.trust_base),
        Err(ProposalVerifyError::InvalidSignature)
    );
}

#[test]
fn test_proposal_rejects_duplicate_shard() {
    let rng = &mut rand::thread_rng();
    let setup = testonly::Setup::new(rng, 4);
    let shard = ShardSetup::default_shard(rng, 4);
    let ir = ShardSetup::next_record(rng, None);
    let mut b1 = setup.make_block(RoundNumber(1), &setup.genesis);
    let data = b1.block.as_mut().unwrap();
    data.payload.requests = vec![shard.quorum_change(&ir), shard.quorum_change(&ir)];
    assert_matches!(
        setup.make_proposal(&b1, None).verify(&setup.trust_base),
        Err(ProposalVerifyError::DuplicateShard)
    );
}

#[test]
fn test_ir_change_request_quorum() {
    let rng = &mut rand::thread_rng();
    let shard = ShardSetup::default_shard(rng, 4);
    let h = ShardSetup::next_record(rng, None);
    let mut other = h.clone();
    other.hash = rng.gen();

    // 3-1 split.
    let mut req = IrChangeRequest {
        partition: shard.shard.partition,
        shard: shard.shard.shard,
        reason: CertReqReason::Quorum,
        requests: vec![
            shard.request(0, &h),
            shard.request(1, &h),
            shard.request(2, &h),
            shard.request(3, &other),
        ],
    };
    assert_eq!(req.verify(&shard.trust_base).unwrap(), Some(h.clone()));
    req.reason = CertReqReason::QuorumNotPossible;
    assert_matches!(
        req.verify(&shard.trust_base),
        Err(IrChangeRequestVerifyError::QuorumStillPossible)
    );

    // Only 2 requests: quorum not reached, but still possible.
    req.requests.truncate(2);
    req.reason = CertReqReason::Quorum;
    assert_matches!(
        req.verify(&shard.trust_base),
        Err(IrChangeRequestVerifyError::NotEnoughVotes { got: 2, want: 3 })
    );

    // The same signer twice.
    req.requests.push(shard.request(0, &h));
    assert_matches!(
        req.verify(&shard.trust_base),
        Err(IrChangeRequestVerifyError::DuplicateSigner)
    );
}

#[test]
fn test_ir_change_request_quorum_not_possible() {
    let rng = &mut rand::thread_rng();
    let shard = ShardSetup::default_shard(rng, 4);
    let a = ShardSetup::next_record(rng, None);
    let mut b = a.clone();
    b.hash = rng.gen();
    let mut c = a.clone();
    c.hash = rng.gen();

    // 2-1-1 split.
    let req = IrChangeRequest {
        partition: shard.shard.partition,
        shard: shard.shard.shard,
        reason: CertReqReason::QuorumNotPossible,
        requests: vec![
            shard.request(0, &a),
            shard.request(1, &a),
            shard.request(2, &b),
            shard.request(3, &c),
        ],
    };
    assert_eq!(req.verify(&shard.trust_base).unwrap(), None);

    // Requests from an unknown validator are rejected.
    let stranger = ShardSetup::new(rng, shard.shard, 1);
    let mut bad = req.clone();
    bad.requests[3] = stranger.request(0, &c);
    assert_matches!(
        bad.verify(&shard.trust_base),
        Err(IrChangeRequestVerifyError::Request(_))
    );
}

#[test]
fn test_ir_change_request_t2_timeout() {
    let rng = &mut rand::thread_rng();
    let shard = ShardSetup::default_shard(rng, 4);
    let mut req = IrChangeRequest::t2_timeout(shard.shard);
    assert_eq!(req.round(), None);
    assert_eq!(req.verify(&shard.trust_base).unwrap(), None);

    // A timeout carries no requests.
    let ir = ShardSetup::next_record(rng, None);
    req.requests.push(shard.request(0, &ir));
    assert_matches!(
        req.verify(&shard.trust_base),
        Err(IrChangeRequestVerifyError::UnexpectedRequests)
    );

    // The reason is part of the hash.
    let mut quorum = IrChangeRequest::t2_timeout(shard.shard);
    quorum.reason = CertReqReason::Quorum;
    assert_ne!(quorum.hash(), IrChangeRequest::t2_timeout(shard.shard).hash());
}

#[test]
fn test_root_msg_serde() {
    let rng = &mut rand::thread_rng();
    let setup = testonly::Setup::new(rng, 4);
    let b1 = setup.make_block(RoundNumber(1), &setup.genesis);
    let msg = RootMsg::Proposal(setup.make_proposal(&b1, None));
    let json = serde_json::to_string(&msg).unwrap();
    let got: RootMsg = serde_json::from_str(&json).unwrap();
    assert_eq!(got, msg);
    assert_eq!(got.label(), "Proposal");
}
