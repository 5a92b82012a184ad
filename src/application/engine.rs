use crate::domain::amortization::{amortize, build_schedule};
use crate::domain::ledger::{
    AccountId, AccountRole, AccountType, ActivityType, ChartOfAccounts, LedgerEntry,
};
use crate::domain::loan::{Loan, LoanId, LoanStatus, LoanTerms, ScheduledPayment, StaffId};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{
    AdjustmentStoreBox, LedgerStoreBox, LoanStoreBox, ReceiptStoreBox, ReconciliationStoreBox,
};
use crate::domain::receipt::{
    LoanAdjustment, PaymentReceipt, Receipt, ReceiptDaySummary, Reconciliation,
};
use crate::error::{Result, ServicingError};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Outcome of a successful cash allocation.
///
/// `interest_paid + principal_paid` equals the receipt amount.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentAllocation {
    pub receipt: Receipt,
    pub interest_paid: Decimal,
    pub principal_paid: Decimal,
    pub paid_off: bool,
}

/// Outcome of a successful write-off.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentAllocation {
    pub adjustment: LoanAdjustment,
    pub interest_adjusted: Decimal,
    pub principal_adjusted: Decimal,
    pub paid_off: bool,
}

/// Per-account debit/credit totals, for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    pub name: String,
    pub account_type: AccountType,
    pub debits: Decimal,
    pub credits: Decimal,
}

impl AccountBalance {
    pub fn net(&self) -> Decimal {
        self.debits - self.credits
    }
}

/// The settlement engine: loan origination, disbursement, the payment and
/// adjustment waterfalls, cash reconciliation, and every double-entry post
/// they produce.
///
/// All validation and chart-of-accounts lookups happen before the first
/// write, so a rejected operation commits nothing. A per-engine mutex
/// serializes each read-compute-write sequence; two concurrent allocations
/// against the same loan can never both read the same outstanding balance.
pub struct ServicingEngine {
    loans: LoanStoreBox,
    receipts: ReceiptStoreBox,
    adjustments: AdjustmentStoreBox,
    ledger: LedgerStoreBox,
    reconciliations: ReconciliationStoreBox,
    chart: ChartOfAccounts,
    guard: Mutex<()>,
}

impl ServicingEngine {
    pub fn new(
        loans: LoanStoreBox,
        receipts: ReceiptStoreBox,
        adjustments: AdjustmentStoreBox,
        ledger: LedgerStoreBox,
        reconciliations: ReconciliationStoreBox,
        chart: ChartOfAccounts,
    ) -> Self {
        Self {
            loans,
            receipts,
            adjustments,
            ledger,
            reconciliations,
            chart,
            guard: Mutex::new(()),
        }
    }

    /// Originates a loan from approved terms: amortizes, assigns the next
    /// loan number, and persists the loan with its repayment schedule.
    pub async fn originate_loan(
        &self,
        terms: LoanTerms,
        approved_by: StaffId,
    ) -> Result<(Loan, Vec<ScheduledPayment>)> {
        let quote = amortize(terms.principal, terms.interest_rate, terms.num_payments)?;

        let _guard = self.guard.lock().await;
        let id = self.loans.next_loan_num().await?;
        let loan = Loan {
            id,
            amount: terms.principal,
            num_payments: terms.num_payments,
            due_monthly: quote.period_payment,
            interest_rate: terms.interest_rate,
            initial_unearned_interest: quote.total_interest,
            principal_per_period: Loan::principal_per_period(terms.principal, terms.num_payments),
            status: LoanStatus::Undisbursed,
            loan_start_date: terms.loan_start_date,
            disbursement_date: None,
            approved_by,
            disbursed_by: None,
        };
        let schedule = build_schedule(id, &quote, &terms)?;

        self.loans.store(loan.clone()).await?;
        self.loans.store_schedule(schedule.clone()).await?;

        info!(
            loan = loan.id,
            principal = %loan.amount,
            due_monthly = %loan.due_monthly,
            periods = loan.num_payments,
            "loan originated"
        );
        Ok((loan, schedule))
    }

    /// Pays the principal out and activates the loan.
    ///
    /// `payouts` are the cash accounts the principal leaves through; their
    /// amounts must sum exactly to the loan amount. Posts one disbursement
    /// entry per payout (Loan Control debit) plus the unearned-interest
    /// entry for the loan's total interest.
    pub async fn disburse(
        &self,
        loan_id: LoanId,
        payouts: &[(AccountId, Decimal)],
        disbursed_by: StaffId,
    ) -> Result<()> {
        for (_, amount) in payouts {
            Amount::new(*amount)?;
        }
        let total: Decimal = payouts.iter().map(|(_, amount)| *amount).sum();

        let _guard = self.guard.lock().await;
        let mut loan = self.require_loan(loan_id).await?;
        if loan.status != LoanStatus::Undisbursed {
            return Err(ServicingError::Validation(format!(
                "loan {loan_id} has already been disbursed"
            )));
        }
        if total != loan.amount {
            return Err(ServicingError::Validation(format!(
                "the payout amounts must add up to {}",
                loan.amount
            )));
        }

        let loan_control = self.chart.account(AccountRole::LoanControl)?;
        let unearned_interest = self.chart.account(AccountRole::UnearnedInterest)?;
        let now = Utc::now().naive_utc();

        loan.status = LoanStatus::Active;
        loan.disbursement_date = Some(now.date());
        loan.disbursed_by = Some(disbursed_by);
        self.loans.store(loan.clone()).await?;

        for (account, amount) in payouts {
            self.post(
                loan_control,
                *account,
                *amount,
                ActivityType::Disbursement,
                Some(loan_id),
                now,
            )
            .await?;
        }
        if loan.initial_unearned_interest > Decimal::ZERO {
            self.post(
                loan_control,
                unearned_interest,
                loan.initial_unearned_interest,
                ActivityType::Disbursement,
                Some(loan_id),
                now,
            )
            .await?;
        }

        info!(loan = loan_id, amount = %loan.amount, "loan disbursed");
        Ok(())
    }

    /// Applies one cash receipt across the loan's outstanding schedule,
    /// oldest obligation first.
    ///
    /// Each fully-covered period contributes its whole balance; the last
    /// period touched may be partial, taking interest first and the
    /// remainder as principal. Fails with `AmountExceedsBalance` before any
    /// write when the amount overshoots the total outstanding.
    pub async fn allocate_payment(
        &self,
        loan_id: LoanId,
        amount: Decimal,
        clerk: StaffId,
    ) -> Result<PaymentAllocation> {
        let amount = Amount::new(amount)?;

        let _guard = self.guard.lock().await;
        let mut loan = self.require_loan(loan_id).await?;
        let mut open = self.open_schedule(loan_id).await?;

        let total_balance: Decimal = open.iter().map(|sp| sp.balance()).sum();
        if amount.value() > total_balance {
            warn!(
                loan = loan_id,
                amount = %amount.value(),
                outstanding = %total_balance,
                "payment rejected: amount exceeds balance"
            );
            return Err(ServicingError::AmountExceedsBalance);
        }
        let paid_off = amount.value() == total_balance;

        let unreconciled = self.chart.account(AccountRole::UnreconciledReceipts)?;
        let loan_control = self.chart.account(AccountRole::LoanControl)?;
        let unearned_interest = self.chart.account(AccountRole::UnearnedInterest)?;
        let interest_income = self.chart.account(AccountRole::InterestIncome)?;

        let ppp = loan.principal_per_period;
        let mut available = amount.value();
        let mut interest_paid = Decimal::ZERO;
        let mut principal_paid = Decimal::ZERO;
        let mut allocations: Vec<(u32, Decimal)> = Vec::new();

        for sp in &open {
            if available <= Decimal::ZERO {
                break;
            }
            let balance = sp.balance();
            let interest_outstanding = (balance - ppp).max(Decimal::ZERO);
            let principal_outstanding = balance.min(ppp);

            if balance <= available {
                allocations.push((sp.payment_number, balance));
                available -= balance;
                interest_paid += interest_outstanding;
                principal_paid += principal_outstanding;
            } else {
                // Partial period: interest is satisfied first, the rest of
                // the funds count as principal. No later period is touched.
                allocations.push((sp.payment_number, available));
                let interest_take = interest_outstanding.min(available);
                interest_paid += interest_take;
                principal_paid += available - interest_take;
                available = Decimal::ZERO;
            }
        }

        let receipt_num = self.receipts.next_receipt_num().await?;
        let now = Utc::now().naive_utc();
        let receipt = Receipt {
            receipt_num,
            loan_id,
            amount: amount.value(),
            receipt_date: now,
            received_by: clerk,
        };
        let payment_receipts = allocations
            .iter()
            .map(|(payment_number, allocated)| PaymentReceipt {
                receipt_num,
                loan_id,
                payment_number: *payment_number,
                amount: *allocated,
            })
            .collect();

        for (payment_number, allocated) in &allocations {
            let sp = open
                .iter_mut()
                .find(|sp| sp.payment_number == *payment_number)
                .ok_or_else(|| {
                    ServicingError::Concurrency(format!(
                        "scheduled payment {payment_number} vanished during allocation"
                    ))
                })?;
            sp.paid += Balance::new(*allocated);
            self.loans.update_payment(sp.clone()).await?;
        }
        self.receipts.store(receipt.clone(), payment_receipts).await?;

        if interest_paid + principal_paid > Decimal::ZERO {
            self.post(
                unreconciled,
                loan_control,
                interest_paid + principal_paid,
                ActivityType::Receipt,
                Some(receipt_num),
                now,
            )
            .await?;
        }
        if interest_paid > Decimal::ZERO {
            self.post(
                unearned_interest,
                interest_income,
                interest_paid,
                ActivityType::Receipt,
                Some(receipt_num),
                now,
            )
            .await?;
        }
        if paid_off {
            loan.status = LoanStatus::Paid;
            self.loans.store(loan).await?;
        }

        info!(
            loan = loan_id,
            receipt = receipt_num,
            amount = %amount.value(),
            interest = %interest_paid,
            principal = %principal_paid,
            paid_off,
            "payment allocated"
        );
        Ok(PaymentAllocation {
            receipt,
            interest_paid,
            principal_paid,
            paid_off,
        })
    }

    /// Forgives balance across the loan's outstanding schedule without cash
    /// movement: interest first across all periods, then principal, both in
    /// schedule order. Each touched period's obligation is decremented in
    /// place; the write-off is irreversible.
    pub async fn allocate_adjustment(
        &self,
        loan_id: LoanId,
        amount: Decimal,
        created_by: StaffId,
    ) -> Result<AdjustmentAllocation> {
        let amount = Amount::new(amount)?;

        let _guard = self.guard.lock().await;
        let mut loan = self.require_loan(loan_id).await?;
        let mut open = self.open_schedule(loan_id).await?;

        let total_balance: Decimal = open.iter().map(|sp| sp.balance()).sum();
        if amount.value() > total_balance {
            warn!(
                loan = loan_id,
                amount = %amount.value(),
                outstanding = %total_balance,
                "adjustment rejected: amount exceeds balance"
            );
            return Err(ServicingError::AmountExceedsBalance);
        }
        let paid_off = amount.value() == total_balance;

        let loan_control = self.chart.account(AccountRole::LoanControl)?;
        let unearned_interest = self.chart.account(AccountRole::UnearnedInterest)?;
        let bad_debt = self.chart.account(AccountRole::LoanAdjustments)?;

        let ppp = loan.principal_per_period;
        let mut available = amount.value();
        let mut interest_adjusted = Decimal::ZERO;
        let mut principal_adjusted = Decimal::ZERO;
        let mut interest_by_period: HashMap<u32, Decimal> = HashMap::new();
        let mut principal_by_period: HashMap<u32, Decimal> = HashMap::new();

        // Pass 1: forgive interest across the whole schedule first.
        for sp in &open {
            if available <= Decimal::ZERO {
                break;
            }
            let interest_outstanding = (sp.balance() - ppp).max(Decimal::ZERO);
            if interest_outstanding > Decimal::ZERO {
                let take = interest_outstanding.min(available);
                interest_by_period.insert(sp.payment_number, take);
                available -= take;
                interest_adjusted += take;
            }
        }

        // Pass 2: forgive principal, net of what pass 1 already took from
        // each period.
        if available > Decimal::ZERO {
            for sp in &open {
                if available <= Decimal::ZERO {
                    break;
                }
                let balance = sp.balance();
                let interest_taken = interest_by_period
                    .get(&sp.payment_number)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                let principal_outstanding = if balance > ppp {
                    ppp
                } else {
                    balance - interest_taken
                };
                if principal_outstanding > Decimal::ZERO {
                    let take = principal_outstanding.min(available);
                    principal_by_period.insert(sp.payment_number, take);
                    available -= take;
                    principal_adjusted += take;
                }
            }
        }

        // One period may have taken from both passes; decrement its
        // obligation by the combined total.
        for sp in open.iter_mut() {
            let total = interest_by_period
                .get(&sp.payment_number)
                .copied()
                .unwrap_or(Decimal::ZERO)
                + principal_by_period
                    .get(&sp.payment_number)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
            if total > Decimal::ZERO {
                sp.amount -= total;
                self.loans.update_payment(sp.clone()).await?;
            }
        }

        let adjustment_num = self.adjustments.next_adjustment_num().await?;
        let adjustment = LoanAdjustment {
            adjustment_num,
            loan_id,
            amount: amount.value(),
            created_by,
        };
        self.adjustments.store(adjustment.clone()).await?;

        let now = Utc::now().naive_utc();
        if interest_adjusted > Decimal::ZERO {
            self.post(
                unearned_interest,
                loan_control,
                interest_adjusted,
                ActivityType::Adjustment,
                Some(adjustment_num),
                now,
            )
            .await?;
        }
        if principal_adjusted > Decimal::ZERO {
            self.post(
                bad_debt,
                loan_control,
                principal_adjusted,
                ActivityType::Adjustment,
                Some(adjustment_num),
                now,
            )
            .await?;
        }
        if paid_off {
            loan.status = LoanStatus::Paid;
            self.loans.store(loan).await?;
        }

        info!(
            loan = loan_id,
            adjustment = adjustment_num,
            amount = %amount.value(),
            interest = %interest_adjusted,
            principal = %principal_adjusted,
            paid_off,
            "adjustment allocated"
        );
        Ok(AdjustmentAllocation {
            adjustment,
            interest_adjusted,
            principal_adjusted,
            paid_off,
        })
    }

    /// Moves cash between two asset accounts.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<LedgerEntry> {
        let amount = Amount::new(amount)?;
        let _guard = self.guard.lock().await;
        self.post(
            to,
            from,
            amount.value(),
            ActivityType::Transfer,
            None,
            Utc::now().naive_utc(),
        )
        .await
    }

    /// Groups every recorded receipt by (calendar day, clerk). Days covered
    /// by a reconciliation carry its surrendered amount and variance; open
    /// days carry neither.
    pub async fn summarize_receipts(&self) -> Result<Vec<ReceiptDaySummary>> {
        let receipts = self.receipts.all().await?;

        let mut groups: BTreeMap<(NaiveDate, StaffId), Vec<&Receipt>> = BTreeMap::new();
        for receipt in &receipts {
            groups
                .entry((receipt.receipt_date.date(), receipt.received_by))
                .or_default()
                .push(receipt);
        }

        let mut summaries = Vec::with_capacity(groups.len());
        for ((date, clerk), day_receipts) in groups {
            let total: Decimal = day_receipts.iter().map(|r| r.amount).sum();
            let reconciliation = self.reconciliations.find(clerk, date).await?;
            summaries.push(ReceiptDaySummary {
                date,
                clerk,
                total,
                count: day_receipts.len(),
                reconciled: reconciliation.as_ref().map(|r| r.amount_surrendered),
                variance: reconciliation
                    .as_ref()
                    .map(|r| r.amount_surrendered - total),
                notes: reconciliation.map(|r| r.notes),
            });
        }
        Ok(summaries)
    }

    /// Closes one clerk's calendar day: records the expected-vs-surrendered
    /// figures and moves the surrendered cash from "Unreconciled Receipts"
    /// to "Cash on Hand".
    ///
    /// The surrendered amount is what gets posted; any variance stays inside
    /// the Unreconciled Receipts balance. A day can only be closed once.
    pub async fn close_reconciliation(
        &self,
        date: NaiveDate,
        clerk: StaffId,
        amount_surrendered: Decimal,
        notes: &str,
    ) -> Result<Reconciliation> {
        if amount_surrendered < Decimal::ZERO {
            return Err(ServicingError::Validation(
                "surrendered amount must not be negative".to_string(),
            ));
        }

        let _guard = self.guard.lock().await;
        if self.reconciliations.find(clerk, date).await?.is_some() {
            return Err(ServicingError::Validation(format!(
                "clerk {clerk} is already reconciled for {date}"
            )));
        }

        let receipts = self.receipts.for_clerk_on(clerk, date).await?;
        let amount_expected: Decimal = receipts.iter().map(|r| r.amount).sum();

        let cash_on_hand = self.chart.account(AccountRole::CashOnHand)?;
        let unreconciled = self.chart.account(AccountRole::UnreconciledReceipts)?;

        let id = self.reconciliations.next_id().await?;
        let reconciliation = Reconciliation {
            id,
            date,
            clerk,
            amount_expected,
            amount_surrendered,
            notes: notes.to_string(),
            receipt_nums: receipts.iter().map(|r| r.receipt_num).collect(),
        };
        self.reconciliations.store(reconciliation.clone()).await?;

        if amount_surrendered > Decimal::ZERO {
            self.post(
                cash_on_hand,
                unreconciled,
                amount_surrendered,
                ActivityType::Reconciliation,
                Some(id),
                Utc::now().naive_utc(),
            )
            .await?;
        }

        info!(
            clerk,
            %date,
            expected = %amount_expected,
            surrendered = %amount_surrendered,
            variance = %reconciliation.variance(),
            "reconciliation closed"
        );
        Ok(reconciliation)
    }

    /// Debit/credit totals per account, in account-id order.
    pub async fn account_balances(&self) -> Result<Vec<AccountBalance>> {
        let mut accounts = self.ledger.all_accounts().await?;
        accounts.sort_by_key(|a| a.id);
        let entries = self.ledger.all_entries().await?;
        let amounts: HashMap<_, _> = entries.iter().map(|e| (e.id, e.amount)).collect();

        Ok(accounts
            .into_iter()
            .map(|account| AccountBalance {
                name: account.name,
                account_type: account.account_type,
                debits: account
                    .debits
                    .iter()
                    .filter_map(|id| amounts.get(id))
                    .sum(),
                credits: account
                    .credits
                    .iter()
                    .filter_map(|id| amounts.get(id))
                    .sum(),
            })
            .collect())
    }

    pub async fn loan(&self, loan_id: LoanId) -> Result<Option<Loan>> {
        self.loans.get(loan_id).await
    }

    async fn require_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.loans
            .get(loan_id)
            .await?
            .ok_or_else(|| ServicingError::Validation(format!("unknown loan {loan_id}")))
    }

    /// Periods with positive balance, in strict payment-number order. The
    /// ordering feeds "times late" reporting downstream and must not change.
    async fn open_schedule(&self, loan_id: LoanId) -> Result<Vec<ScheduledPayment>> {
        let mut open: Vec<ScheduledPayment> = self
            .loans
            .schedule(loan_id)
            .await?
            .into_iter()
            .filter(|sp| sp.balance() > Decimal::ZERO)
            .collect();
        open.sort_by_key(|sp| sp.payment_number);
        Ok(open)
    }

    /// The only place entries are created. Appends the entry id to both
    /// account reference collections for the same amount, so global debits
    /// and credits stay equal by construction.
    async fn post(
        &self,
        debit: AccountId,
        credit: AccountId,
        amount: Decimal,
        activity_type: ActivityType,
        activity_id: Option<u32>,
        date: NaiveDateTime,
    ) -> Result<LedgerEntry> {
        if amount <= Decimal::ZERO {
            return Err(ServicingError::Validation(
                "ledger entries must carry a positive amount".to_string(),
            ));
        }
        if debit == credit {
            return Err(ServicingError::Validation(
                "debit and credit accounts must differ".to_string(),
            ));
        }
        let mut debit_account = self
            .ledger
            .get_account(debit)
            .await?
            .ok_or_else(|| ServicingError::MissingAccount(format!("account #{debit}")))?;
        let mut credit_account = self
            .ledger
            .get_account(credit)
            .await?
            .ok_or_else(|| ServicingError::MissingAccount(format!("account #{credit}")))?;

        let id = self.ledger.next_entry_id().await?;
        let entry = LedgerEntry {
            id,
            amount,
            activity_type,
            activity_id,
            date,
            debit_account: debit,
            credit_account: credit,
        };
        self.ledger.store_entry(entry.clone()).await?;

        debit_account.debits.push(id);
        credit_account.credits.push(id);
        self.ledger.store_account(debit_account).await?;
        self.ledger.store_account(credit_account).await?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{LedgerStore, LoanStore, ReceiptStore};
    use crate::infrastructure::in_memory::{
        InMemoryAdjustmentStore, InMemoryLedgerStore, InMemoryLoanStore, InMemoryReceiptStore,
        InMemoryReconciliationStore,
    };
    use rust_decimal_macros::dec;

    struct TestContext {
        engine: ServicingEngine,
        loans: InMemoryLoanStore,
        receipts: InMemoryReceiptStore,
        ledger: InMemoryLedgerStore,
    }

    async fn context() -> TestContext {
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
        TestContext {
            engine,
            loans,
            receipts,
            ledger,
        }
    }

    fn terms() -> LoanTerms {
        LoanTerms {
            principal: dec!(1000),
            interest_rate: dec!(2),
            num_payments: 10,
            loan_start_date: NaiveDate::from_ymd_opt(2023, 1, 15).unwrap(),
        }
    }

    fn cash_account() -> AccountId {
        ChartOfAccounts::standard()
            .account(AccountRole::CashOnHand)
            .unwrap()
    }

    /// Originates and disburses the 1000 / 2% / 10-period worked example:
    /// ten periods of 120, principal-per-period 100.
    async fn active_loan(ctx: &TestContext) -> Loan {
        let (loan, _) = ctx.engine.originate_loan(terms(), 1).await.unwrap();
        ctx.engine
            .disburse(loan.id, &[(cash_account(), dec!(1000))], 1)
            .await
            .unwrap();
        ctx.loans.get(loan.id).await.unwrap().unwrap()
    }

    async fn assert_ledger_balanced(ctx: &TestContext) {
        let balances = ctx.engine.account_balances().await.unwrap();
        let debits: Decimal = balances.iter().map(|b| b.debits).sum();
        let credits: Decimal = balances.iter().map(|b| b.credits).sum();
        assert_eq!(debits, credits, "global debits must equal global credits");
    }

    #[tokio::test]
    async fn test_originate_worked_example() {
        let ctx = context().await;
        let (loan, schedule) = ctx.engine.originate_loan(terms(), 1).await.unwrap();

        assert_eq!(loan.id, 10000);
        assert_eq!(loan.due_monthly, dec!(120));
        assert_eq!(loan.initial_unearned_interest, dec!(200));
        assert_eq!(loan.principal_per_period, dec!(100));
        assert_eq!(loan.status, LoanStatus::Undisbursed);
        // due_monthly * num_payments == amount + initial_unearned_interest
        assert_eq!(
            loan.due_monthly * Decimal::from(loan.num_payments),
            loan.amount + loan.initial_unearned_interest
        );
        assert_eq!(schedule.len(), 10);
        assert!(schedule.iter().all(|sp| sp.amount == dec!(120)));
    }

    #[tokio::test]
    async fn test_disburse_activates_and_posts() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.disbursed_by, Some(1));
        assert!(loan.disbursement_date.is_some());

        let entries = ctx.ledger.all_entries().await.unwrap();
        // One payout of 1000 and the 200 unearned interest entry.
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|e| e.activity_type == ActivityType::Disbursement));
        assert_eq!(entries[0].amount, dec!(1000));
        assert_eq!(entries[1].amount, dec!(200));
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_disburse_rejects_mismatched_payouts() {
        let ctx = context().await;
        let (loan, _) = ctx.engine.originate_loan(terms(), 1).await.unwrap();

        let err = ctx
            .engine
            .disburse(loan.id, &[(cash_account(), dec!(900))], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServicingError::Validation(_)));

        // Nothing committed: still undisbursed, no entries.
        let loan = ctx.loans.get(loan.id).await.unwrap().unwrap();
        assert_eq!(loan.status, LoanStatus::Undisbursed);
        assert!(ctx.ledger.all_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disburse_twice_rejected() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;
        let err = ctx
            .engine
            .disburse(loan.id, &[(cash_account(), dec!(1000))], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServicingError::Validation(_)));
    }

    #[tokio::test]
    async fn test_payment_single_full_period() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        let allocation = ctx.engine.allocate_payment(loan.id, dec!(120), 7).await.unwrap();

        assert_eq!(allocation.interest_paid, dec!(20));
        assert_eq!(allocation.principal_paid, dec!(100));
        assert_eq!(allocation.receipt.amount, dec!(120));
        assert_eq!(allocation.receipt.receipt_num, 100);
        assert!(!allocation.paid_off);

        // Period 1 retired, period 2 untouched.
        let schedule = ctx.loans.schedule(loan.id).await.unwrap();
        assert_eq!(schedule[0].balance(), dec!(0));
        assert_eq!(schedule[1].balance(), dec!(120));

        // Two receipt postings: 120 Unreconciled -> Loan Control, 20
        // Unearned Interest -> Interest Income.
        let entries = ctx.ledger.all_entries().await.unwrap();
        let receipt_entries: Vec<_> = entries
            .iter()
            .filter(|e| e.activity_type == ActivityType::Receipt)
            .collect();
        assert_eq!(receipt_entries.len(), 2);
        assert_eq!(receipt_entries[0].amount, dec!(120));
        assert_eq!(receipt_entries[1].amount, dec!(20));
        assert_eq!(receipt_entries[0].activity_id, Some(100));
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_payment_partial_second_period() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        // 150 across two periods of 120: period 1 fully (20/100), period 2
        // partially (interest 20, principal 10).
        let allocation = ctx.engine.allocate_payment(loan.id, dec!(150), 7).await.unwrap();

        assert_eq!(allocation.interest_paid, dec!(40));
        assert_eq!(allocation.principal_paid, dec!(110));
        assert_eq!(
            allocation.interest_paid + allocation.principal_paid,
            dec!(150)
        );

        let schedule = ctx.loans.schedule(loan.id).await.unwrap();
        assert_eq!(schedule[0].balance(), dec!(0));
        assert_eq!(schedule[1].balance(), dec!(90));
        assert_eq!(schedule[2].balance(), dec!(120));

        // The receipt fans out into exactly the touched periods.
        let fan_out = ctx.receipts.allocations_for(100).await;
        assert_eq!(fan_out.len(), 2);
        assert_eq!(fan_out[0].amount, dec!(120));
        assert_eq!(fan_out[1].amount, dec!(30));
        let total: Decimal = fan_out.iter().map(|pr| pr.amount).sum();
        assert_eq!(total, allocation.receipt.amount);
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_payment_conservation_across_amounts() {
        for amount in [dec!(1), dec!(99), dec!(100), dec!(119), dec!(121), dec!(600)] {
            let ctx = context().await;
            let loan = active_loan(&ctx).await;
            let allocation = ctx.engine.allocate_payment(loan.id, amount, 7).await.unwrap();
            assert_eq!(
                allocation.interest_paid + allocation.principal_paid,
                amount,
                "conservation failed for {amount}"
            );
            assert_ledger_balanced(&ctx).await;
        }
    }

    #[tokio::test]
    async fn test_payment_fifo_ordering() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        ctx.engine.allocate_payment(loan.id, dec!(50), 7).await.unwrap();
        let schedule = ctx.loans.schedule(loan.id).await.unwrap();

        // Period 1 still open: nothing later may have been reduced.
        assert_eq!(schedule[0].balance(), dec!(70));
        assert!(schedule[1..].iter().all(|sp| sp.balance() == dec!(120)));
    }

    #[tokio::test]
    async fn test_payment_overcommit_rejected_without_side_effects() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;
        let entries_before = ctx.ledger.all_entries().await.unwrap().len();

        let err = ctx
            .engine
            .allocate_payment(loan.id, dec!(1201), 7)
            .await
            .unwrap_err();
        assert!(matches!(err, ServicingError::AmountExceedsBalance));

        let schedule = ctx.loans.schedule(loan.id).await.unwrap();
        assert!(schedule.iter().all(|sp| sp.balance() == dec!(120)));
        assert!(ctx.receipts.all().await.unwrap().is_empty());
        assert_eq!(ctx.ledger.all_entries().await.unwrap().len(), entries_before);
        let loan = ctx.loans.get(loan.id).await.unwrap().unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
    }

    #[tokio::test]
    async fn test_payment_rejects_non_positive_amount() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;
        assert!(ctx.engine.allocate_payment(loan.id, dec!(0), 7).await.is_err());
        assert!(ctx.engine.allocate_payment(loan.id, dec!(-10), 7).await.is_err());
    }

    #[tokio::test]
    async fn test_payment_payoff_transition() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        // One unit short leaves the loan active.
        let allocation = ctx.engine.allocate_payment(loan.id, dec!(1199), 7).await.unwrap();
        assert!(!allocation.paid_off);
        assert_eq!(
            ctx.loans.get(loan.id).await.unwrap().unwrap().status,
            LoanStatus::Active
        );

        // The final unit retires the schedule.
        let allocation = ctx.engine.allocate_payment(loan.id, dec!(1), 7).await.unwrap();
        assert!(allocation.paid_off);
        assert_eq!(
            ctx.loans.get(loan.id).await.unwrap().unwrap().status,
            LoanStatus::Paid
        );
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_adjustment_interest_first_across_periods() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        // 30 of forgiveness: interest pass takes 20 from period 1, then 10
        // from period 2. No principal touched.
        let allocation = ctx
            .engine
            .allocate_adjustment(loan.id, dec!(30), 2)
            .await
            .unwrap();
        assert_eq!(allocation.interest_adjusted, dec!(30));
        assert_eq!(allocation.principal_adjusted, dec!(0));
        assert_eq!(allocation.adjustment.adjustment_num, 100);

        // Write-off decrements the obligation itself.
        let schedule = ctx.loans.schedule(loan.id).await.unwrap();
        assert_eq!(schedule[0].amount, dec!(100));
        assert_eq!(schedule[1].amount, dec!(110));
        assert_eq!(schedule[2].amount, dec!(120));

        // Single posting: 30 Unearned Interest -> Loan Control.
        let entries: Vec<_> = ctx
            .ledger
            .all_entries()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.activity_type == ActivityType::Adjustment)
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, dec!(30));
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_adjustment_both_passes_touch_one_period() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        // 230 = all 200 of interest plus 30 principal from period 1.
        let allocation = ctx
            .engine
            .allocate_adjustment(loan.id, dec!(230), 2)
            .await
            .unwrap();
        assert_eq!(allocation.interest_adjusted, dec!(200));
        assert_eq!(allocation.principal_adjusted, dec!(30));

        let schedule = ctx.loans.schedule(loan.id).await.unwrap();
        // Period 1 lost 20 interest + 30 principal, the rest 20 each.
        assert_eq!(schedule[0].amount, dec!(70));
        assert!(schedule[1..].iter().all(|sp| sp.amount == dec!(100)));

        let entries: Vec<_> = ctx
            .ledger
            .all_entries()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.activity_type == ActivityType::Adjustment)
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount, dec!(200));
        assert_eq!(entries[1].amount, dec!(30));
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_adjustment_full_writeoff_pays_off() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        let allocation = ctx
            .engine
            .allocate_adjustment(loan.id, dec!(1200), 2)
            .await
            .unwrap();
        assert!(allocation.paid_off);
        assert_eq!(allocation.interest_adjusted, dec!(200));
        assert_eq!(allocation.principal_adjusted, dec!(1000));

        let schedule = ctx.loans.schedule(loan.id).await.unwrap();
        assert!(schedule.iter().all(|sp| sp.balance() == dec!(0)));
        assert_eq!(
            ctx.loans.get(loan.id).await.unwrap().unwrap().status,
            LoanStatus::Paid
        );
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_adjustment_overcommit_rejected() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        let err = ctx
            .engine
            .allocate_adjustment(loan.id, dec!(1300), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ServicingError::AmountExceedsBalance));
        let schedule = ctx.loans.schedule(loan.id).await.unwrap();
        assert!(schedule.iter().all(|sp| sp.amount == dec!(120)));
    }

    #[tokio::test]
    async fn test_adjustment_after_partial_payment() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;

        // Pay period 1 down to 70, then forgive 10: the interest pass sees
        // no interest left in period 1 (balance 70 < ppp 100) and takes all
        // 10 from period 2's interest.
        ctx.engine.allocate_payment(loan.id, dec!(50), 7).await.unwrap();
        let allocation = ctx
            .engine
            .allocate_adjustment(loan.id, dec!(10), 2)
            .await
            .unwrap();
        assert_eq!(allocation.interest_adjusted, dec!(10));
        assert_eq!(allocation.principal_adjusted, dec!(0));

        let schedule = ctx.loans.schedule(loan.id).await.unwrap();
        assert_eq!(schedule[0].amount, dec!(120));
        assert_eq!(schedule[1].amount, dec!(110));
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_missing_account_aborts_before_writes() {
        let loans = InMemoryLoanStore::new();
        let receipts = InMemoryReceiptStore::new();
        let ledger = InMemoryLedgerStore::new();
        let engine = ServicingEngine::new(
            Box::new(loans.clone()),
            Box::new(receipts.clone()),
            Box::new(InMemoryAdjustmentStore::new()),
            Box::new(ledger.clone()),
            Box::new(InMemoryReconciliationStore::new()),
            ChartOfAccounts::default(),
        );

        let (loan, _) = engine.originate_loan(terms(), 1).await.unwrap();
        let err = engine.allocate_payment(loan.id, dec!(120), 7).await.unwrap_err();
        assert!(matches!(err, ServicingError::MissingAccount(_)));

        // The rejection happened before any schedule or receipt write.
        let schedule = loans.schedule(loan.id).await.unwrap();
        assert!(schedule.iter().all(|sp| sp.balance() == dec!(120)));
        assert!(receipts.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconciliation_posts_surrendered_amount() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;
        ctx.engine.allocate_payment(loan.id, dec!(300), 7).await.unwrap();
        ctx.engine.allocate_payment(loan.id, dec!(200), 7).await.unwrap();

        let today = Utc::now().date_naive();
        let reconciliation = ctx
            .engine
            .close_reconciliation(today, 7, dec!(480), "short till")
            .await
            .unwrap();

        assert_eq!(reconciliation.amount_expected, dec!(500));
        assert_eq!(reconciliation.amount_surrendered, dec!(480));
        assert_eq!(reconciliation.variance(), dec!(-20));
        assert_eq!(reconciliation.receipt_nums, vec![100, 101]);

        // The posting carries 480, not 500: the variance stays in
        // Unreconciled Receipts.
        let entries: Vec<_> = ctx
            .ledger
            .all_entries()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.activity_type == ActivityType::Reconciliation)
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, dec!(480));
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_reconciliation_close_once() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;
        ctx.engine.allocate_payment(loan.id, dec!(120), 7).await.unwrap();

        let today = Utc::now().date_naive();
        ctx.engine
            .close_reconciliation(today, 7, dec!(120), "")
            .await
            .unwrap();
        let err = ctx
            .engine
            .close_reconciliation(today, 7, dec!(120), "")
            .await
            .unwrap_err();
        assert!(matches!(err, ServicingError::Validation(_)));

        // No second posting.
        let count = ctx
            .ledger
            .all_entries()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.activity_type == ActivityType::Reconciliation)
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_summarize_receipts_open_and_closed_days() {
        let ctx = context().await;
        let loan = active_loan(&ctx).await;
        ctx.engine.allocate_payment(loan.id, dec!(120), 7).await.unwrap();
        ctx.engine.allocate_payment(loan.id, dec!(120), 8).await.unwrap();

        let today = Utc::now().date_naive();
        ctx.engine
            .close_reconciliation(today, 7, dec!(100), "short")
            .await
            .unwrap();

        let summaries = ctx.engine.summarize_receipts().await.unwrap();
        assert_eq!(summaries.len(), 2);

        let closed = summaries.iter().find(|s| s.clerk == 7).unwrap();
        assert_eq!(closed.total, dec!(120));
        assert_eq!(closed.count, 1);
        assert_eq!(closed.reconciled, Some(dec!(100)));
        assert_eq!(closed.variance, Some(dec!(-20)));
        assert_eq!(closed.notes.as_deref(), Some("short"));

        let open = summaries.iter().find(|s| s.clerk == 8).unwrap();
        assert_eq!(open.total, dec!(120));
        assert!(open.reconciled.is_none());
        assert!(open.variance.is_none());
    }

    #[tokio::test]
    async fn test_transfer_between_cash_accounts() {
        let ctx = context().await;
        let chart = ChartOfAccounts::standard();
        let cash = chart.account(AccountRole::CashOnHand).unwrap();
        let unreconciled = chart.account(AccountRole::UnreconciledReceipts).unwrap();

        let entry = ctx.engine.transfer(cash, unreconciled, dec!(75)).await.unwrap();
        assert_eq!(entry.activity_type, ActivityType::Transfer);
        assert_eq!(entry.debit_account, unreconciled);
        assert_eq!(entry.credit_account, cash);
        assert!(entry.activity_id.is_none());
        assert_ledger_balanced(&ctx).await;
    }

    #[tokio::test]
    async fn test_transfer_rejects_same_account() {
        let ctx = context().await;
        let cash = cash_account();
        let err = ctx.engine.transfer(cash, cash, dec!(75)).await.unwrap_err();
        assert!(matches!(err, ServicingError::Validation(_)));
    }
}
