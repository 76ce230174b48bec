pub mod contact;
pub mod metrics;
pub mod payload;
