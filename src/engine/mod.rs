//! # Execution Engine
//!
//! Decides which fragments are new, dispatches them one at a time, and
//! restarts the backing session when executed work is invalidated.
//!
//! - [`SequentialExecutor`] - the engine: `start`, `stop`, `execute`
//! - [`TeardownHandle`] - completion signal of an asynchronous teardown
//! - `ChangeListener` - edit subscriber that triggers invalidation

mod executor;
mod listener;
mod state;
mod teardown;

pub use executor::SequentialExecutor;
pub use teardown::TeardownHandle;
