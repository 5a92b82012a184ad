//! Flat-rate amortization: a loan's level payment and repayment schedule.

use super::loan::{LoanId, LoanTerms, ScheduledPayment};
use super::money::{Balance, ceil_units};
use crate::error::{Result, ServicingError};
use chrono::Months;
use rust_decimal::Decimal;

/// Output of [`amortize`]: the level payment and the interest figure after
/// rounding has been absorbed into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmortizationQuote {
    /// Level payment per period, rounded up to the whole currency unit.
    pub period_payment: Decimal,
    /// `period_payment * num_periods - principal`; carries the rounding so
    /// the principal figure stays exact.
    pub total_interest: Decimal,
    /// `period_payment * num_periods`.
    pub total_payable: Decimal,
}

/// Computes the level payment for a flat-rate loan.
///
/// Interest is `principal * rate/100 * periods`, not compounding. The period
/// payment is rounded up so the lender never under-collects; the excess is
/// absorbed into the interest figure.
pub fn amortize(
    principal: Decimal,
    rate_percent: Decimal,
    num_periods: u32,
) -> Result<AmortizationQuote> {
    if principal <= Decimal::ZERO {
        return Err(ServicingError::Validation(
            "principal must be positive".to_string(),
        ));
    }
    if num_periods == 0 {
        return Err(ServicingError::Validation(
            "number of periods must be positive".to_string(),
        ));
    }
    if rate_percent < Decimal::ZERO {
        return Err(ServicingError::Validation(
            "interest rate must not be negative".to_string(),
        ));
    }

    let periods = Decimal::from(num_periods);
    let total_interest = principal * (rate_percent / Decimal::from(100)) * periods;
    let period_payment = ceil_units((principal + total_interest) / periods);
    let total_payable = period_payment * periods;

    Ok(AmortizationQuote {
        period_payment,
        total_interest: total_payable - principal,
        total_payable,
    })
}

/// Emits the repayment schedule: one payment per period, due one calendar
/// month apart starting one month after the loan start date.
pub fn build_schedule(
    loan_id: LoanId,
    quote: &AmortizationQuote,
    terms: &LoanTerms,
) -> Result<Vec<ScheduledPayment>> {
    (1..=terms.num_payments)
        .map(|n| {
            let due_date = terms
                .loan_start_date
                .checked_add_months(Months::new(n))
                .ok_or_else(|| {
                    ServicingError::Validation(format!("due date out of range for period {n}"))
                })?;
            Ok(ScheduledPayment {
                loan_id,
                payment_number: n,
                due_date,
                amount: quote.period_payment,
                paid: Balance::ZERO,
            })
        })
        .collect()
}
