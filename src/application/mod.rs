//! Application layer containing the settlement orchestration.
//!
//! This module defines the `ServicingEngine`, the single entry point for
//! origination, disbursement, allocation, and reconciliation. It owns the
//! repository ports and serializes each read-compute-write sequence so
//! allocations stay atomic per loan.

pub mod engine;
