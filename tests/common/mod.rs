use lendcore::application::engine::ServicingEngine;
use lendcore::domain::ledger::ChartOfAccounts;
use lendcore::domain::ports::LedgerStore;
use lendcore::infrastructure::in_memory::{
    InMemoryAdjustmentStore, InMemoryLedgerStore, InMemoryLoanStore, InMemoryReceiptStore,
    InMemoryReconciliationStore,
};

/// Concrete store handles kept alongside the engine so tests can inspect
/// persisted state directly.
pub struct TestStores {
    pub loans: InMemoryLoanStore,
    pub receipts: InMemoryReceiptStore,
    pub ledger: InMemoryLedgerStore,
    pub reconciliations: InMemoryReconciliationStore,
}

pub async fn engine() -> (ServicingEngine, TestStores) {
    let loans = InMemoryLoanStore::new();
    let receipts = InMemoryReceiptStore::new();
    let adjustments = InMemoryAdjustmentStore::new();
    let ledger = InMemoryLedgerStore::new();
    let reconciliations = InMemoryReconciliationStore::new();

    for account in ChartOfAccounts::standard_accounts() {
        ledger.store_account(account).await.unwrap();
    }

    let engine = ServicingEngine::new(
        Box::new(loans.clone()),
        Box::new(receipts.clone()),
        Box::new(adjustments.clone()),
        Box::new(ledger.clone()),
        Box::new(reconciliations.clone()),
        ChartOfAccounts::standard(),
    );

    (
        engine,
        TestStores {
            loans,
            receipts,
            ledger,
            reconciliations,
        },
    )
}
