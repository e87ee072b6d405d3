use std::fs;
use std::sync::Arc;

use ledger_core::{Ledger, LedgerConfig, PaymentRecord, Record};
use ledger_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub const SECRET: &str = "storage-test-secret";

pub fn create_temp_store() -> (TempDir, SledStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = SledStore::open(temp_dir.path()).expect("Failed to open SledStore");
    (temp_dir, store)
}

pub fn open_ledger(store: Arc<SledStore>) -> Ledger<SledStore> {
    let ledger = Ledger::new(store, LedgerConfig::new(SECRET)).expect("Failed to build ledger");
    ledger.initialize().expect("Failed to initialize ledger");
    ledger
}

pub fn payment(i: u64) -> Record {
    Record::Payment(PaymentRecord {
        payment_id: format!("pay-{i}"),
        tenant_id: format!("tenant-{}", i % 3),
        property_id: "prop-1".to_string(),
        lease_id: None,
        amount: 1_000 + i,
        method: "ach".to_string(),
        reference: None,
    })
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}
