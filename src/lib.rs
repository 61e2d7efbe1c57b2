#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod session;
pub mod storage;
pub mod task;
pub mod tui;
