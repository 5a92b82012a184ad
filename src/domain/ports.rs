//! Repository ports the engine drives. Implementations must make each
//! engine operation's read-compute-write sequence atomic against the
//! backing store; sequence numbers are issued by the store, never derived
//! from a read at the call site.

use super::ledger::{Account, AccountId, EntryId, LedgerEntry};
use super::loan::{Loan, LoanId, ScheduledPayment, StaffId};
use super::receipt::{
    AdjustmentNum, LoanAdjustment, PaymentReceipt, Receipt, ReceiptNum, Reconciliation,
    ReconciliationId,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn store(&self, loan: Loan) -> Result<()>;
    async fn get(&self, loan_id: LoanId) -> Result<Option<Loan>>;
    async fn next_loan_num(&self) -> Result<LoanId>;
    async fn store_schedule(&self, payments: Vec<ScheduledPayment>) -> Result<()>;
    /// The loan's schedule, sorted ascending by payment number.
    async fn schedule(&self, loan_id: LoanId) -> Result<Vec<ScheduledPayment>>;
    async fn update_payment(&self, payment: ScheduledPayment) -> Result<()>;
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn store(&self, receipt: Receipt, allocations: Vec<PaymentReceipt>) -> Result<()>;
    async fn next_receipt_num(&self) -> Result<ReceiptNum>;
    /// All receipts a clerk collected on one calendar day.
    async fn for_clerk_on(&self, clerk: StaffId, date: NaiveDate) -> Result<Vec<Receipt>>;
    async fn all(&self) -> Result<Vec<Receipt>>;
}

#[async_trait]
pub trait AdjustmentStore: Send + Sync {
    async fn store(&self, adjustment: LoanAdjustment) -> Result<()>;
    async fn next_adjustment_num(&self) -> Result<AdjustmentNum>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn store_account(&self, account: Account) -> Result<()>;
    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>>;
    async fn all_accounts(&self) -> Result<Vec<Account>>;
    async fn store_entry(&self, entry: LedgerEntry) -> Result<()>;
    async fn all_entries(&self) -> Result<Vec<LedgerEntry>>;
    async fn next_entry_id(&self) -> Result<EntryId>;
}

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn store(&self, reconciliation: Reconciliation) -> Result<()>;
    async fn next_id(&self) -> Result<ReconciliationId>;
    async fn find(&self, clerk: StaffId, date: NaiveDate) -> Result<Option<Reconciliation>>;
}

pub type LoanStoreBox = Box<dyn LoanStore>;
pub type ReceiptStoreBox = Box<dyn ReceiptStore>;
pub type AdjustmentStoreBox = Box<dyn AdjustmentStore>;
pub type LedgerStoreBox = Box<dyn LedgerStore>;
pub type ReconciliationStoreBox = Box<dyn ReconciliationStore>;
