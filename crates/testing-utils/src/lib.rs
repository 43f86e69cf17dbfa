//! # TaskWorker Testing Utils
//!
//! 工作区共享的测试工具：
//!
//! - **MockJobStore**: 内存版作业存储，语义与真实后端一致，可模拟后端不可用
//! - **ManualClock**: 手动推进的时钟，用于模拟时间流逝
//! - **ScheduledJobBuilder**: 测试数据构建器
//! - **sqlite_store / PostgresTestContainer**: 真实后端的测试环境
//!
//! ```toml
//! [dev-dependencies]
//! taskworker-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
