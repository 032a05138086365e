//! A durable, concurrent, record-oriented append path with automatic
//! rotation into archived files driven by size and/or time thresholds,
//! configurable retention, and process-wide deduplication of appenders by
//! filename.
//!
//! ```no_run
//! use bfappender::{AppenderHandle, Options};
//!
//! let appender = AppenderHandle::open_default("/var/log/myapp/access.log");
//! appender.write(b"hello\n").expect("write failed");
//! ```
//!
//! Every [`AppenderHandle`] opened for the same (canonicalized) path shares
//! one underlying file, buffer, and rotation state with every other handle
//! on that path in the process, so independent call sites can log to the
//! same file without coordinating a shared handle themselves.

mod buffer;
mod cutter;
mod driver;
mod error;
mod flush_timer;
mod handle;
mod options;
mod registry;
mod rotation;
mod time_bucket;

pub use error::{Error, Result};
pub use handle::{AppenderHandle, OnScrollSubscription};
pub use options::{
    FlushAtLeastTime, FlushOverSize, Options, ScrollByTime, ScrollBySize, ScrollKeepCount,
    ScrollKeepTime, DEFAULT, FOREVER, NEVER,
};
