use crate::application::engine::AccountBalance;
use crate::domain::ledger::AccountType;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow<'a> {
    account: &'a str,
    r#type: &'static str,
    debits: String,
    credits: String,
    net: String,
}

fn type_label(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Cash => "CASH",
        AccountType::OtherAsset => "OTHER_ASSET",
        AccountType::Liability => "LIABILITY",
        AccountType::Revenue => "REVENUE",
        AccountType::Expense => "EXPENSE",
    }
}

/// Writes per-account debit/credit totals as CSV.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_balances(&mut self, balances: Vec<AccountBalance>) -> Result<()> {
        for balance in &balances {
            self.writer.serialize(AccountRow {
                account: &balance.name,
                r#type: type_label(balance.account_type),
                debits: balance.debits.to_string(),
                credits: balance.credits.to_string(),
                net: balance.net().to_string(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
