//! Observability helpers for upstream calls.
//!
//! Every public operation runs inside a `rental_broker.call` span carrying the `call` kind and
//! the `stage` (call site). With the `metrics` feature enabled the
//! `rental_broker_call_total` counter is incremented per attempt, success, failure, and cache
//! hit, labeled by `call` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Upstream operations observed by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
	/// Client-credentials token acquisition.
	Token,
	/// Paginated listings walk.
	Listings,
	/// Availability resolution.
	Availability,
	/// Quote creation.
	Quote,
}
impl CallKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallKind::Token => "token",
			CallKind::Listings => "listings",
			CallKind::Availability => "availability",
			CallKind::Quote => "quote",
		}
	}
}
impl Display for CallKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Entry to a broker operation.
	Attempt,
	/// Answered from a cache without upstream traffic.
	CacheHit,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::CacheHit => "cache_hit",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
