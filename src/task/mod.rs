//! Session-scoped scheduling
//!
//! Tasks bound through [`TaskScheduler::bind`] fire after a delay, optionally
//! repeat, and are cancelled when their session closes.

pub mod disconnect;
pub mod scheduler;
pub mod scoped;

pub use disconnect::{AutoDisconnect, AUTO_DISCONNECT_KEY};
pub use scheduler::{TaskScheduler, MAX_TASK_DELAY};
pub use scoped::{ScopedTask, TaskContext, TaskHandle, SCOPED_TASK_KEY_PREFIX};
