//! Domain model: money values, loan aggregates, ledger primitives, and the
//! repository ports the settlement engine is written against.

pub mod amortization;
pub mod ledger;
pub mod loan;
pub mod money;
pub mod ports;
pub mod receipt;
