//! Ledger records and the ports the payment core depends on.

pub mod event;
pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
pub mod refund;
