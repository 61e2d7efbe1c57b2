#![forbid(unsafe_code)]

pub mod due_date;
pub mod model;
pub mod store;

pub use model::{Task, TaskCounts, TaskFilter};
pub use store::{IdPolicy, StoreOptions, TaskStore, WriteOrder};
