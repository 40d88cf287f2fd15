//! Shared utilities.

mod ids;
mod timestamps;

pub use ids::{generate_uuid, generate_uuid_v7};
pub use timestamps::{iso_timestamp, now, Timestamp};
