use crate::error::ServicingError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Originate,
    Disburse,
    Payment,
    Adjustment,
    Reconcile,
}

/// One row of a servicing operation file. Columns that an operation does
/// not use are left empty.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Operation {
    pub op: OperationType,
    pub loan: Option<u32>,
    pub amount: Option<Decimal>,
    pub clerk: Option<u32>,
    pub rate: Option<Decimal>,
    pub periods: Option<u32>,
    pub date: Option<NaiveDate>,
}

pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn operations(self) -> impl Iterator<Item = Result<Operation, ServicingError>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(ServicingError::from))
    }
}
