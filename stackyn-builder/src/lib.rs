pub mod build;
pub mod clone;
pub mod detect;
pub mod recipe;
pub mod validate;
pub mod worker;

pub use worker::{BuildTaskPayload, BuildWorker, DeployTaskPayload};
