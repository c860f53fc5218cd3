//! Driving adapters: the HTTP API and the CSV export.

pub mod csv;
pub mod http;
