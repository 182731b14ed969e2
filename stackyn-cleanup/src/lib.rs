pub mod billing;
pub mod resource;

pub use billing::{sweep_expired_trials, BillingCleanup, BillingSweepReport};
pub use resource::{sweep as sweep_resources, ResourceSweepReport};
