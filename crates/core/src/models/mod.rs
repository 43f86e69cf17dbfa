pub mod audit;
pub mod job;

pub use audit::{ExecutionAudit, NewExecutionAudit};
pub use job::{JobStatus, Payload, ScheduledJob};
