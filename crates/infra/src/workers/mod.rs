//! Background workers (durable-queue intake, retention sweeping).

pub mod intake_worker;
pub mod retention;

pub use intake_worker::{Disposition, IntakeWorker, IntakeWorkerConfig, IntakeWorkerHandle, IntakeWorkerStats};
pub use retention::{RetentionSweeper, SweeperHandle};
