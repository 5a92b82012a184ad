//! In-memory port implementations, the bundled backend for tests and the
//! CLI. Sequence counters live inside the same lock as the data they key.

use crate::domain::ledger::{Account, AccountId, EntryId, LedgerEntry};
use crate::domain::loan::{Loan, LoanId, ScheduledPayment, StaffId};
use crate::domain::ports::{
    AdjustmentStore, LedgerStore, LoanStore, ReceiptStore, ReconciliationStore,
};
use crate::domain::receipt::{
    AdjustmentNum, LoanAdjustment, PaymentReceipt, Receipt, ReceiptNum, Reconciliation,
    ReconciliationId,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const FIRST_LOAN_NUM: LoanId = 10000;
const FIRST_RECEIPT_NUM: ReceiptNum = 100;
const FIRST_ADJUSTMENT_NUM: AdjustmentNum = 100;

#[derive(Default)]
struct LoanState {
    loans: HashMap<LoanId, Loan>,
    // Keyed by (loan, payment number); the schedule fetch sorts.
    schedule: HashMap<(LoanId, u32), ScheduledPayment>,
    next_loan_num: Option<LoanId>,
}

/// Thread-safe in-memory loan/schedule store.
#[derive(Default, Clone)]
pub struct InMemoryLoanStore {
    state: Arc<RwLock<LoanState>>,
}

impl InMemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoanStore for InMemoryLoanStore {
    async fn store(&self, loan: Loan) -> Result<()> {
        let mut state = self.state.write().await;
        state.loans.insert(loan.id, loan);
        Ok(())
    }

    async fn get(&self, loan_id: LoanId) -> Result<Option<Loan>> {
        let state = self.state.read().await;
        Ok(state.loans.get(&loan_id).cloned())
    }

    async fn next_loan_num(&self) -> Result<LoanId> {
        let mut state = self.state.write().await;
        let num = state.next_loan_num.unwrap_or(FIRST_LOAN_NUM);
        state.next_loan_num = Some(num + 1);
        Ok(num)
    }

    async fn store_schedule(&self, payments: Vec<ScheduledPayment>) -> Result<()> {
        let mut state = self.state.write().await;
        for sp in payments {
            state.schedule.insert((sp.loan_id, sp.payment_number), sp);
        }
        Ok(())
    }

    async fn schedule(&self, loan_id: LoanId) -> Result<Vec<ScheduledPayment>> {
        let state = self.state.read().await;
        let mut schedule: Vec<ScheduledPayment> = state
            .schedule
            .values()
            .filter(|sp| sp.loan_id == loan_id)
            .cloned()
            .collect();
        schedule.sort_by_key(|sp| sp.payment_number);
        Ok(schedule)
    }

    async fn update_payment(&self, payment: ScheduledPayment) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .schedule
            .insert((payment.loan_id, payment.payment_number), payment);
        Ok(())
    }
}

#[derive(Default)]
struct ReceiptState {
    receipts: HashMap<ReceiptNum, Receipt>,
    allocations: Vec<PaymentReceipt>,
    next_receipt_num: Option<ReceiptNum>,
}

/// Thread-safe in-memory receipt store with its monotonic counter.
#[derive(Default, Clone)]
pub struct InMemoryReceiptStore {
    state: Arc<RwLock<ReceiptState>>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fan-out rows of one receipt, for inspection in tests.
    pub async fn allocations_for(&self, receipt_num: ReceiptNum) -> Vec<PaymentReceipt> {
        let state = self.state.read().await;
        state
            .allocations
            .iter()
            .filter(|pr| pr.receipt_num == receipt_num)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn store(&self, receipt: Receipt, allocations: Vec<PaymentReceipt>) -> Result<()> {
        let mut state = self.state.write().await;
        state.receipts.insert(receipt.receipt_num, receipt);
        state.allocations.extend(allocations);
        Ok(())
    }

    async fn next_receipt_num(&self) -> Result<ReceiptNum> {
        let mut state = self.state.write().await;
        let num = state.next_receipt_num.unwrap_or(FIRST_RECEIPT_NUM);
        state.next_receipt_num = Some(num + 1);
        Ok(num)
    }

    async fn for_clerk_on(&self, clerk: StaffId, date: NaiveDate) -> Result<Vec<Receipt>> {
        let state = self.state.read().await;
        let mut receipts: Vec<Receipt> = state
            .receipts
            .values()
            .filter(|r| r.received_by == clerk && r.receipt_date.date() == date)
            .cloned()
            .collect();
        receipts.sort_by_key(|r| r.receipt_num);
        Ok(receipts)
    }

    async fn all(&self) -> Result<Vec<Receipt>> {
        let state = self.state.read().await;
        let mut receipts: Vec<Receipt> = state.receipts.values().cloned().collect();
        receipts.sort_by_key(|r| r.receipt_num);
        Ok(receipts)
    }
}

#[derive(Default)]
struct AdjustmentState {
    adjustments: HashMap<AdjustmentNum, LoanAdjustment>,
    next_adjustment_num: Option<AdjustmentNum>,
}

#[derive(Default, Clone)]
pub struct InMemoryAdjustmentStore {
    state: Arc<RwLock<AdjustmentState>>,
}

impl InMemoryAdjustmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdjustmentStore for InMemoryAdjustmentStore {
    async fn store(&self, adjustment: LoanAdjustment) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .adjustments
            .insert(adjustment.adjustment_num, adjustment);
        Ok(())
    }

    async fn next_adjustment_num(&self) -> Result<AdjustmentNum> {
        let mut state = self.state.write().await;
        let num = state.next_adjustment_num.unwrap_or(FIRST_ADJUSTMENT_NUM);
        state.next_adjustment_num = Some(num + 1);
        Ok(num)
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    entries: HashMap<EntryId, LedgerEntry>,
    next_entry_id: EntryId,
}

/// Thread-safe in-memory chart-of-accounts and entry store.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn store_account(&self, account: Account) -> Result<()> {
        let mut state = self.state.write().await;
        state.accounts.insert(account.id, account);
        Ok(())
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&account_id).cloned())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.values().cloned().collect())
    }

    async fn store_entry(&self, entry: LedgerEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.insert(entry.id, entry);
        Ok(())
    }

    async fn all_entries(&self) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<LedgerEntry> = state.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn next_entry_id(&self) -> Result<EntryId> {
        let mut state = self.state.write().await;
        state.next_entry_id += 1;
        Ok(state.next_entry_id)
    }
}

#[derive(Default)]
struct ReconciliationState {
    reconciliations: HashMap<ReconciliationId, Reconciliation>,
    next_id: ReconciliationId,
}

#[derive(Default, Clone)]
pub struct InMemoryReconciliationStore {
    state: Arc<RwLock<ReconciliationState>>,
}

impl InMemoryReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryReconciliationStore {
    async fn store(&self, reconciliation: Reconciliation) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .reconciliations
            .insert(reconciliation.id, reconciliation);
        Ok(())
    }

    async fn next_id(&self) -> Result<ReconciliationId> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        Ok(state.next_id)
    }

    async fn find(&self, clerk: StaffId, date: NaiveDate) -> Result<Option<Reconciliation>> {
        let state = self.state.read().await;
        Ok(state
            .reconciliations
            .values()
            .find(|r| r.clerk == clerk && r.date == date)
            .cloned())
    }
}
