//! Case-management API access: record writes, entity lookups, and the
//! timestamp format records use.

pub mod client;
pub mod resolver;
pub mod timestamp;

pub use client::{CaseApi, CaseClient, DownstreamError, Resource};
pub use resolver::{CaseApiResolver, EntityResolver, Resolution};
pub use timestamp::TimestampZone;
