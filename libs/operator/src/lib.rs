pub mod controller;
pub mod driver;
pub mod event;
pub mod labels;
pub mod metrics;
pub mod telemetry;

pub use eventrigger_k8s_util::error;
