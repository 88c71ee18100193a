//! Data models for Kite Connect API responses.

pub mod holding;
pub mod profile;

pub use holding::Holding;
pub use profile::Profile;
