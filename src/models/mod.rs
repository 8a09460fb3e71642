//! Data models for provider webhooks and case-management records

mod records;
mod webhook;

pub use records::*;
pub use webhook::*;
