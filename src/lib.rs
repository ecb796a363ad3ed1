//! Continuously discovers text files under a directory tree and streams the
//! lines appended to them.
//!
//! Files may be created, truncated, rotated or deleted while they are being
//! tailed. Each file is read from a stored offset so unchanged bytes are never
//! read twice, and a line without a terminator yet is surfaced as a partial
//! line that is later replaced by an update. Filesystem notifications (driven
//! by [`notify`](https://crates.io/crates/notify)) are backed by a periodic
//! reconciliation scan that catches anything the notifications missed.
//!
//! ## Example
//!
//! ```no_run
//! use foldertail::{Config, Tailer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), foldertail::TailError> {
//!     let config = Config {
//!         include: vec!["*.log".to_string()],
//!         ..Config::new("/var/log")
//!     };
//!
//!     let shutdown = CancellationToken::new();
//!     let mut handle = Tailer::new(config)?.start(shutdown.clone()).await?;
//!     let mut lines = handle.take_lines().expect("lines already taken");
//!
//!     while let Some(line) = lines.recv().await {
//!         if !line.is_partial() {
//!             println!("{}: {}", line.path(), line.text());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery
//!
//! Lines are queued in a bounded buffer. When the consumer falls behind, the
//! oldest queued lines are dropped rather than stalling the engine; see
//! [`LineReceiver::dropped`].

mod classify;
mod config;
mod engine;
mod error;
mod events;
mod pattern;
mod queue;
mod reader;
mod reconcile;
mod state;

pub use classify::{has_binary_extension, is_text, is_text_file, sniff_content_type};
pub use config::{Config, DEFAULT_ERROR_CAPACITY, DEFAULT_LINE_CAPACITY, DEFAULT_MAX_LINE_BYTES};
pub use engine::{ErrorReceiver, Phase, TailHandle, Tailer};
pub use error::TailError;
pub use events::FsEvent;
pub use pattern::{compile as compile_patterns, Matcher, Pattern, PatternKind};
pub use queue::LineReceiver;
pub use reader::{split_lines, tail_last_lines, IncrementalReader, Line, Tail, TRUNCATION_MARKER};
pub use state::FileState;

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
