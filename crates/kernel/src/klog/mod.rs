//! Kernel logging: the kmsg ring plus the `printk`-style macro family.
//!
//! Every log line is framed into a fixed-size ring; when the ring fills the
//! oldest entries are dropped and `first_seq` advances. Readers drain with
//! `kmsg_read`, which renders one entry as `"<level>,<seq>,<ts>;text\n"`
//! and moves the caller's cursor. Error and warning lines are mirrored to
//! the arch debug console immediately.

mod kmsg;

pub use kmsg::{kmsg_read, next_seq, Facility};

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

pub fn log(level: LogLevel, facility: Facility, args: fmt::Arguments) {
    let text = alloc::format!("{}", args);
    kmsg::log_raw(level, facility, &text);

    // Mirror everything but debug chatter to the console.
    if level <= LogLevel::Info {
        let line = alloc::format!("[{}] {}\n", level.as_str(), text);
        crate::arch::debug_write(&line);
    }
}

#[macro_export]
macro_rules! printk {
    ($level:expr, $($arg:tt)*) => {
        $crate::klog::log($level, $crate::klog::Facility::Kern, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::printk!($crate::klog::LogLevel::Error, $($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::printk!($crate::klog::LogLevel::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::printk!($crate::klog::LogLevel::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::printk!($crate::klog::LogLevel::Debug, $($arg)*)
    };
}
