//! Job dispatchers and the thread pool that hosts them.

pub mod dispatcher;
pub mod pool;

pub use dispatcher::{finish, Dispatcher};
pub use pool::{RunnerGroup, StopHandle, WorkerPool};
