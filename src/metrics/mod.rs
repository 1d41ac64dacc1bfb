//! In-process aggregation for `serve`: the live report and the endpoints
//! that expose it.

pub mod collector;
pub mod stream;

pub use collector::LiveReport;
