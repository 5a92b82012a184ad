//! Chart-of-accounts primitives and the immutable double-entry record.

use crate::error::{Result, ServicingError};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type AccountId = u32;
pub type EntryId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Cash,
    OtherAsset,
    Liability,
    Revenue,
    Expense,
}

/// The fixed set of accounts the engines post against.
///
/// Enum-keyed so callers configure account references once instead of
/// looking accounts up by name at every call site.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum AccountRole {
    LoanControl,
    UnearnedInterest,
    InterestIncome,
    UnreconciledReceipts,
    CashOnHand,
    LoanAdjustments,
}

impl AccountRole {
    pub const ALL: [AccountRole; 6] = [
        AccountRole::LoanControl,
        AccountRole::UnearnedInterest,
        AccountRole::InterestIncome,
        AccountRole::UnreconciledReceipts,
        AccountRole::CashOnHand,
        AccountRole::LoanAdjustments,
    ];

    /// Canonical display name, used when seeding and reporting.
    pub fn name(&self) -> &'static str {
        match self {
            AccountRole::LoanControl => "Loan Control",
            AccountRole::UnearnedInterest => "Unearned Interest",
            AccountRole::InterestIncome => "Interest Income",
            AccountRole::UnreconciledReceipts => "Unreconciled Receipts",
            AccountRole::CashOnHand => "Cash on Hand",
            AccountRole::LoanAdjustments => "Bad Debt / Loan Adjustments",
        }
    }

    pub fn account_type(&self) -> AccountType {
        match self {
            AccountRole::LoanControl => AccountType::OtherAsset,
            AccountRole::UnearnedInterest => AccountType::Liability,
            AccountRole::InterestIncome => AccountType::Revenue,
            AccountRole::UnreconciledReceipts => AccountType::OtherAsset,
            AccountRole::CashOnHand => AccountType::Cash,
            AccountRole::LoanAdjustments => AccountType::Expense,
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One chart-of-accounts node. The `debits`/`credits` collections are
/// append-only references to posted entries.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub account_type: AccountType,
    pub debits: Vec<EntryId>,
    pub credits: Vec<EntryId>,
}

impl Account {
    pub fn new(id: AccountId, name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            id,
            name: name.into(),
            account_type,
            debits: Vec::new(),
            credits: Vec::new(),
        }
    }
}

/// The business event behind a ledger entry.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Disbursement,
    Receipt,
    Adjustment,
    Reconciliation,
    Transfer,
}

/// An immutable double-entry record: one debit, one balancing credit.
///
/// Posting appends the entry id to both account reference collections for
/// the same amount, so the global sum of debits equals the global sum of
/// credits by construction.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: EntryId,
    pub amount: Decimal,
    pub activity_type: ActivityType,
    /// The business entity (loan, receipt, adjustment, reconciliation)
    /// that caused this entry, when there is one.
    pub activity_id: Option<u32>,
    pub date: NaiveDateTime,
    pub debit_account: AccountId,
    pub credit_account: AccountId,
}

/// Role-to-account configuration injected into the engine.
#[derive(Debug, Clone, Default)]
pub struct ChartOfAccounts {
    accounts: HashMap<AccountRole, AccountId>,
}

impl ChartOfAccounts {
    pub fn new(accounts: HashMap<AccountRole, AccountId>) -> Self {
        Self { accounts }
    }

    pub fn account(&self, role: AccountRole) -> Result<AccountId> {
        self.accounts
            .get(&role)
            .copied()
            .ok_or_else(|| ServicingError::MissingAccount(role.name().to_string()))
    }

    /// The standard chart with ids drawn from the conventional numbering
    /// bands (cash 1000s, other assets 2000s, liabilities 3000s, revenue
    /// 4000s, expenses 5000s).
    pub fn standard() -> Self {
        Self::new(
            Self::standard_accounts()
                .into_iter()
                .zip(AccountRole::ALL)
                .map(|(account, role)| (role, account.id))
                .collect(),
        )
    }

    /// Account rows matching [`ChartOfAccounts::standard`], for seeding a
    /// fresh ledger store.
    pub fn standard_accounts() -> Vec<Account> {
        AccountRole::ALL
            .iter()
            .map(|role| {
                let id = match role.account_type() {
                    AccountType::Cash => 1000,
                    AccountType::OtherAsset => 2000,
                    AccountType::Liability => 3000,
                    AccountType::Revenue => 4000,
                    AccountType::Expense => 5000,
                };
                // Two OtherAsset roles share a band; offset by position.
                let offset = AccountRole::ALL
                    .iter()
                    .take_while(|r| *r != role)
                    .filter(|r| r.account_type() == role.account_type())
                    .count() as u32;
                Account::new(id + offset, role.name(), role.account_type())
            })
            .collect()
    }
}
