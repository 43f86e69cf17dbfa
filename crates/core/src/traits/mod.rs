pub mod clock;
pub mod job_store;
pub mod task_handler;

pub use clock::{Clock, SystemClock};
pub use job_store::JobStore;
pub use task_handler::{FnHandler, TaskHandler, TaskSignature};
