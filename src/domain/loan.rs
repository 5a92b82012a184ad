use super::money::{Balance, round_units};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Loans are keyed by their sequential loan number (issued from 10000).
pub type LoanId = u32;
/// Clerks and back-office staff are identified by the external auth layer.
pub type StaffId = u32;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Undisbursed,
    Active,
    Paid,
    Cancelled,
    Defaulted,
}

/// Terms requested at application approval, input to origination.
#[derive(Debug, Clone, PartialEq)]
pub struct LoanTerms {
    pub principal: Decimal,
    /// Flat rate, percent per period (not compounding).
    pub interest_rate: Decimal,
    pub num_payments: u32,
    pub loan_start_date: NaiveDate,
}

/// A serviced loan.
///
/// Invariant: `due_monthly * num_payments == amount + initial_unearned_interest`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: LoanId,
    /// Principal disbursed to the client.
    pub amount: Decimal,
    pub num_payments: u32,
    /// Level monthly payment.
    pub due_monthly: Decimal,
    pub interest_rate: Decimal,
    /// Total scheduled payments minus principal, fixed at origination.
    pub initial_unearned_interest: Decimal,
    /// Pure-principal portion of one full period payment, fixed at
    /// origination and used by both allocation waterfalls.
    pub principal_per_period: Decimal,
    pub status: LoanStatus,
    pub loan_start_date: NaiveDate,
    pub disbursement_date: Option<NaiveDate>,
    pub approved_by: StaffId,
    pub disbursed_by: Option<StaffId>,
}

impl Loan {
    pub fn principal_per_period(amount: Decimal, num_payments: u32) -> Decimal {
        round_units(amount / Decimal::from(num_payments))
    }
}

/// One period of a loan's repayment schedule.
///
/// `amount` is the outstanding obligation for the period; adjustments
/// decrement it in place, payments only grow `paid`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPayment {
    pub loan_id: LoanId,
    /// 1-based, unique per loan, the allocation ordering key.
    pub payment_number: u32,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    /// Sum of receipt allocations against this period.
    pub paid: Balance,
}

impl ScheduledPayment {
    /// Outstanding obligation. Never negative: allocations are capped at the
    /// balance before being recorded.
    pub fn balance(&self) -> Decimal {
        self.amount - self.paid.0
    }
}
