//! Resource pools bounding concurrent CPU work and peak heap pressure.

mod buffer;
mod worker;

pub use buffer::{BufferPool, DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY};
pub use worker::{BoxError, ContextTask, PoolError, Task, WorkerPool, WorkerPoolStats};
