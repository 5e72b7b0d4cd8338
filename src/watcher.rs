//! Debounced File Watcher
//!
//! Turns the noisy stream of directory change notifications into one
//! "this file changed" callback per watched path after a quiet period.
//!
//! # Architecture
//!
//! ```text
//! WatchBackend (notify)  ──RawEvent──►  FileWatcher::run
//!   watches parent dirs                   │ keep Create / Write
//!                                         │ keep watched paths only
//!                                         ▼
//!                                    Debouncer (one timer per path)
//!                                         │ fires `debounce` after the
//!                                         ▼ last event of a burst
//!                                     on_change()
//! ```
//!
//! The backend sits behind [`WatchBackend`] so filtering and debouncing can
//! be driven by a fake event source in tests.

mod backend;
mod debounce;
mod error;
mod file_watcher;

pub use backend::{EVENT_CHANNEL_CAPACITY, FsEvent, FsEventKind, NotifyBackend, RawEvent, WatchBackend};
pub use error::WatchError;
pub use file_watcher::{DEFAULT_DEBOUNCE, FileWatcher};
