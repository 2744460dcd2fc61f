use super::*;
use rand::Rng as _;
use rootchain_roles::validator::{testonly::Setup, CommittedHead, RoundNumber};
use std::sync::Arc;


/// Creates a fresh store for a test.
trait InitStore {
    fn init_store(&self) -> Arc<dyn KeyValueStore>;
}

struct InMemory;

impl InitStore for InMemory {
    fn init_store(&self) -> Arc<dyn KeyValueStore> {
        Arc::new(InMemoryStore::new())
    }
}

fn test_key_value_store(init: &impl InitStore) {
    let db = init.init_store();
    assert_eq!(db.get(b"a").unwrap(), None);
    db.put(b"b", b"2").unwrap();
    db.put(b"a", b"1").unwrap();
    db.put(b"c", b"3").unwrap();
    assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));

    let keys: Vec<_> = db
        .range(b"a", b"c")
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    assert_eq!(
        db.last_in_range(b"a", b"c").unwrap(),
        Some((b"b".to_vec(), b"2".to_vec()))
    );
    assert_eq!(db.last_in_range(b"x", b"z").unwrap(), None);
    assert!(db.range(b"c", b"a").unwrap().is_empty());

    let mut batch = WriteBatch::new();
    batch.delete(b"a".to_vec()).put(b"d".to_vec(), b"4".to_vec());
    db.write(batch).unwrap();
    assert_eq!(db.get(b"a").unwrap(), None);
    assert_eq!(db.get(b"d").unwrap(), Some(b"4".to_vec()));
}

fn test_block_store(init: &impl InitStore) {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let store = BlockStore::new(init.init_store());
    assert_eq!(store.committed_head().unwrap(), None);
    store.init(&setup.genesis).unwrap();
    // Initializing twice is fine.
    store.init(&setup.genesis).unwrap();
    let head = store.committed_head().unwrap().unwrap();
    assert_eq!(head.round(), RoundNumber::GENESIS);
    assert_eq!(head.block, setup.genesis);

    let mut b1 = setup.make_block(RoundNumber(1), &setup.genesis);
    b1.qc = Some(setup.make_qc(&b1, None));
    let mut b2 = setup.make_block(RoundNumber(2), &b1);
    b2.qc = Some(setup.make_qc(&b2, None));
    store.store_block(&b1).unwrap();
    store.store_block(&b2).unwrap();
    assert_eq!(store.load_block(RoundNumber(1)).unwrap(), Some(b1.clone()));
    assert_eq!(
        store.blocks_from(RoundNumber(1)).unwrap(),
        vec![b1.clone(), b2.clone()]
    );
    assert_eq!(store.load_block(RoundNumber(3)).unwrap(), None);

    let new_head = CommittedHead {
        block: b1.clone(),
        commit_qc: b2.qc.clone(),
        certificates: Default::default(),
    };
    store.commit(&new_head, &[RoundNumber(2)]).unwrap();
    assert_eq!(store.committed_head().unwrap(), Some(new_head.clone()));
    assert_eq!(store.load_block(RoundNumber(2)).unwrap(), None);

    // Reset drops everything above the new head.
    store.store_block(&b2).unwrap();
    store.reset(&new_head, &[]).unwrap();
    assert_eq!(store.blocks_from(RoundNumber(2)).unwrap(), vec![]);
    assert_eq!(store.load_block(RoundNumber(1)).unwrap(), Some(b1));

    // A different genesis is rejected.
    let other = Setup::new(rng, 4);
    let mut other_genesis = other.genesis.clone();
    other_genesis.root_hash = rng.gen();
    assert!(store.init(&other_genesis).is_err());
}

fn test_safety_data(init: &impl InitStore) {
    let store = BlockStore::new(init.init_store());
    assert_eq!(store.safety_data().unwrap(), SafetyData::default());
    let data = SafetyData {
        highest_voted_round: RoundNumber(7),
        highest_qc_round: RoundNumber(6),
    };
    store.set_safety_data(&data).unwrap();
    assert_eq!(store.safety_data().unwrap(), data);
}

#[test]
fn key_value_store_in_memory() {
    test_key_value_store(&InMemory);
}

#[test]
fn block_store_in_memory() {
    test_block_store(&InMemory);
}

#[test]
fn safety_data_in_memory() {
    test_safety_data(&InMemory);
}
