#![no_std]

pub mod alignment;
pub mod log;
pub mod once_lock;

pub use alignment::{align_down_usize, align_up_usize};
pub use log::{LogLevel, log_get_level, log_is_enabled, log_register_backend, log_set_level};
pub use once_lock::OnceLock;
