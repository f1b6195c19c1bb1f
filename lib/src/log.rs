//! Pool allocator logging subsystem.
//!
//! All diagnostic output funnels through a single registered **backend**
//! function pointer, the same "single funnel + pluggable backend" shape
//! used for kernel logging elsewhere in this codebase. Unlike a kernel's
//! early-boot serial fallback, there is no sensible default transport for
//! a freestanding library, so the default backend is a silent no-op until
//! a host application registers one with [`log_register_backend`].
//!
//! # Backend contract
//!
//! The backend receives the pre-formatted arguments for a single log line
//! and is responsible for writing it, including any trailing newline.

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[inline(always)]
fn is_enabled(level: LogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

/// Signature of a log backend.
pub type LogBackend = fn(fmt::Arguments<'_>);

/// Stored as a raw pointer; `null` means "no backend registered yet".
static BACKEND: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

fn silent_backend(_args: fmt::Arguments<'_>) {}

/// Dispatch a log line through the active backend.
#[inline]
fn dispatch(args: fmt::Arguments<'_>) {
    let ptr = BACKEND.load(Ordering::Acquire);
    if ptr.is_null() {
        silent_backend(args);
    } else {
        // SAFETY: `log_register_backend` only ever stores valid `LogBackend`
        // function pointers, which share a representation with `*mut ()`.
        let backend: LogBackend = unsafe { core::mem::transmute(ptr) };
        backend(args);
    }
}

/// Register a backend to receive log lines. Replaces any previously
/// registered backend.
pub fn log_register_backend(backend: LogBackend) {
    BACKEND.store(backend as *mut (), Ordering::Release);
}

pub fn log_set_level(level: LogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn log_get_level() -> LogLevel {
    LogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

pub fn log_is_enabled(level: LogLevel) -> bool {
    is_enabled(level)
}

/// Emit a formatted log line at the given level.
pub fn log_args(level: LogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    dispatch(args);
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log::log_args($crate::log::LogLevel::Error, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::log::log_args($crate::log::LogLevel::Warn, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::log::log_args($crate::log::LogLevel::Info, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::log::log_args($crate::log::LogLevel::Debug, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::log::log_args($crate::log::LogLevel::Trace, ::core::format_args!($($arg)*))
    };
}
