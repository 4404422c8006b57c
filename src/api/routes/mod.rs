//! Route handlers, grouped by resource

pub mod alerts;
pub mod health;
pub mod instances;
pub mod summary;
