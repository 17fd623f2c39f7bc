//! Concurrent appends never fork a chain.

use std::collections::HashSet;
use std::sync::Arc;

use custody_ledger::core::{EventType, GENESIS_HASH};
use custody_ledger::store::{EventStore, MemoryStore, SqliteStore};
use custody_ledger::{Ledger, LedgerConfig};
use custody_ledger_testkit::fixtures::input;

const WRITERS: usize = 32;

async fn hammer<S: EventStore + 'static>(ledger: Arc<Ledger<S>>) {
    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let shipment = if i % 4 == 0 { "SH-SIDE" } else { "SH-HOT" };
            ledger
                .record_event(input(shipment, EventType::Checkpoint).meta("writer", i as i64))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let hot = ledger.get_shipment_events(&"SH-HOT".into()).await.unwrap();
    let side = ledger.get_shipment_events(&"SH-SIDE".into()).await.unwrap();
    assert_eq!(hot.len() + side.len(), WRITERS);

    for chain in [&hot, &side] {
        assert_eq!(*chain[0].previous_hash(), GENESIS_HASH);
        for pair in chain.windows(2) {
            assert_eq!(*pair[1].previous_hash(), *pair[0].data_hash());
            assert!(pair[0].sequence() < pair[1].sequence());
        }
        let parents: HashSet<_> = chain.iter().map(|e| *e.previous_hash()).collect();
        assert_eq!(parents.len(), chain.len(), "two events share a parent");
    }

    let tx: HashSet<_> = hot.iter().chain(&side).map(|e| *e.transaction_hash()).collect();
    assert_eq!(tx.len(), WRITERS);

    assert!(ledger.verify_chain(&"SH-HOT".into()).await.unwrap().is_valid);
    assert!(ledger.verify_chain(&"SH-SIDE".into()).await.unwrap().is_valid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_forks_memory() {
    hammer(Arc::new(Ledger::new(MemoryStore::new(), LedgerConfig::default()))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_forks_sqlite() {
    let store = SqliteStore::open_memory().unwrap();
    hammer(Arc::new(Ledger::new(store, LedgerConfig::default()))).await;
}
