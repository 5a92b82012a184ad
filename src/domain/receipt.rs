//! Append-only cash collection and forgiveness records.

use super::loan::{LoanId, StaffId};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Receipt numbers are monotonic and double as the receipt key.
pub type ReceiptNum = u32;
pub type AdjustmentNum = u32;
pub type ReconciliationId = u32;

/// One cash-collection event. Never updated or deleted once created.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub receipt_num: ReceiptNum,
    pub loan_id: LoanId,
    pub amount: Decimal,
    pub receipt_date: NaiveDateTime,
    /// Clerk who collected the cash.
    pub received_by: StaffId,
}

/// Fan-out of one receipt across scheduled payments. The amounts of a
/// receipt's rows sum to the receipt's amount.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub receipt_num: ReceiptNum,
    pub loan_id: LoanId,
    pub payment_number: u32,
    pub amount: Decimal,
}

/// One forgiveness event. Its effect is realized by decrementing
/// `ScheduledPayment.amount` in place, not by referencing periods.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoanAdjustment {
    pub adjustment_num: AdjustmentNum,
    pub loan_id: LoanId,
    /// Total forgiven.
    pub amount: Decimal,
    pub created_by: StaffId,
}

/// Close-out of one clerk's one calendar day of cash collection.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub id: ReconciliationId,
    pub date: NaiveDate,
    pub clerk: StaffId,
    /// Sum of the clerk's recorded receipts that day.
    pub amount_expected: Decimal,
    /// Cash actually handed in.
    pub amount_surrendered: Decimal,
    pub notes: String,
    pub receipt_nums: Vec<ReceiptNum>,
}

impl Reconciliation {
    pub fn variance(&self) -> Decimal {
        self.amount_surrendered - self.amount_expected
    }
}

/// One row of the receipts-by-day summary: a clerk's day is "open" until a
/// reconciliation covers it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDaySummary {
    pub date: NaiveDate,
    pub clerk: StaffId,
    pub total: Decimal,
    pub count: usize,
    /// `amount_surrendered` of the covering reconciliation, once closed.
    pub reconciled: Option<Decimal>,
    /// `reconciled - total`, once closed.
    pub variance: Option<Decimal>,
    pub notes: Option<String>,
}
