//! Append-only JSON-lines audit log for engine decisions.
//!
//! Producers hold a cloneable [`AuditSink`]; a background tokio task owns the
//! file and drains a bounded channel. [`AuditSink::try_log`] never waits, so
//! it can sit on a synchronous evaluation path.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, handle) = AuditSink::start("/var/log/rulegate/audit.jsonl").await?;
//!
//! sink.log(AuditEntry::new(
//!     AuditEventType::EngineStarted,
//!     AuditSource::new("rulegate"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ))
//! .await;
//!
//! drop(sink);
//! let written = handle.await?;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{AuditEntry, AuditEventType, AuditSource, DecisionRecord};
pub use sink::AuditSink;
pub use writer::{AuditWriteError, AuditWriter};
