pub mod admission;
pub mod container;
pub mod controller;
pub mod labels;
pub mod network;
pub mod worker;

pub use admission::RamCache;
pub use controller::{verify, Controller, VerifyResult};
pub use worker::DeployWorker;
