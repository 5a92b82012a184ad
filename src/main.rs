use clap::Parser;
use lendcore::application::engine::ServicingEngine;
use lendcore::domain::ledger::{AccountRole, ChartOfAccounts};
use lendcore::domain::loan::LoanTerms;
use lendcore::domain::ports::LedgerStore;
use lendcore::error::{Result as ServicingResult, ServicingError};
use lendcore::infrastructure::in_memory::{
    InMemoryAdjustmentStore, InMemoryLedgerStore, InMemoryLoanStore, InMemoryReceiptStore,
    InMemoryReconciliationStore,
};
use lendcore::interfaces::csv::account_writer::AccountWriter;
use lendcore::interfaces::csv::operation_reader::{Operation, OperationReader, OperationType};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let ledger = InMemoryLedgerStore::new();
    for account in ChartOfAccounts::standard_accounts() {
        ledger.store_account(account).await.into_diagnostic()?;
    }

    let engine = ServicingEngine::new(
        Box::new(InMemoryLoanStore::new()),
        Box::new(InMemoryReceiptStore::new()),
        Box::new(InMemoryAdjustmentStore::new()),
        Box::new(ledger),
        Box::new(InMemoryReconciliationStore::new()),
        ChartOfAccounts::standard(),
    );

    // Replay operations; a bad row is reported and skipped.
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for op_result in reader.operations() {
        match op_result {
            Ok(op) => {
                if let Err(e) = apply_operation(&engine, op).await {
                    eprintln!("Error processing operation: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {}", e);
            }
        }
    }

    // Output final chart-of-accounts state.
    let balances = engine.account_balances().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_balances(balances).into_diagnostic()?;

    Ok(())
}

fn require<T>(value: Option<T>, column: &str) -> ServicingResult<T> {
    value.ok_or_else(|| ServicingError::Validation(format!("missing column: {column}")))
}

async fn apply_operation(engine: &ServicingEngine, op: Operation) -> ServicingResult<()> {
    match op.op {
        OperationType::Originate => {
            let terms = LoanTerms {
                principal: require(op.amount, "amount")?,
                interest_rate: require(op.rate, "rate")?,
                num_payments: require(op.periods, "periods")?,
                loan_start_date: require(op.date, "date")?,
            };
            engine
                .originate_loan(terms, require(op.clerk, "clerk")?)
                .await?;
        }
        OperationType::Disburse => {
            let loan_id = require(op.loan, "loan")?;
            let loan = engine
                .loan(loan_id)
                .await?
                .ok_or_else(|| ServicingError::Validation(format!("unknown loan {loan_id}")))?;
            // The CLI pays the whole principal out through Cash on Hand.
            let cash = ChartOfAccounts::standard().account(AccountRole::CashOnHand)?;
            engine
                .disburse(loan_id, &[(cash, loan.amount)], require(op.clerk, "clerk")?)
                .await?;
        }
        OperationType::Payment => {
            engine
                .allocate_payment(
                    require(op.loan, "loan")?,
                    require(op.amount, "amount")?,
                    require(op.clerk, "clerk")?,
                )
                .await?;
        }
        OperationType::Adjustment => {
            engine
                .allocate_adjustment(
                    require(op.loan, "loan")?,
                    require(op.amount, "amount")?,
                    require(op.clerk, "clerk")?,
                )
                .await?;
        }
        OperationType::Reconcile => {
            engine
                .close_reconciliation(
                    require(op.date, "date")?,
                    require(op.clerk, "clerk")?,
                    require(op.amount, "amount")?,
                    "",
                )
                .await?;
        }
    }
    Ok(())
}
