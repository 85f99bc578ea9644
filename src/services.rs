//! Listings, availability, and quote services layered over the scheduled, retried transport.

pub mod availability;
pub mod listings;
pub mod quote;
pub mod shape;

pub use availability::*;
pub use listings::*;
pub use quote::*;
pub use shape::{LegacyShapeAdapter, NestedRecordWalker};

// crates.io
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};
// self
use crate::{_prelude::*, auth::ApiScope, http::UpstreamRequest};

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Boxed future returned by [`UpstreamCall::call`].
pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + 'a + Send>>;

/// Sends one logical upstream request with the scope's token, admission control, and retry
/// applied.
pub trait UpstreamCall
where
	Self: Send + Sync,
{
	/// Executes `request` on behalf of `scope` and returns the parsed JSON body.
	fn call(&self, scope: ApiScope, request: UpstreamRequest) -> CallFuture<'_>;
}

/// Parses a `YYYY-MM-DD` date supplied by a caller.
pub(crate) fn parse_date(field: &str, raw: &str) -> Result<Date> {
	Date::parse(raw.trim(), ISO_DATE)
		.map_err(|_| Error::invalid_request(format!("{field} must be a YYYY-MM-DD date")))
}

/// Validates a stay window and returns the parsed bounds.
pub(crate) fn parse_stay(check_in: &str, check_out: &str) -> Result<(Date, Date)> {
	let start = parse_date("check-in", check_in)?;
	let end = parse_date("check-out", check_out)?;

	if start >= end {
		return Err(Error::invalid_request("check-out must be after check-in"));
	}

	Ok((start, end))
}

/// Joins an endpoint path onto a base URL, keeping any base path prefix.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url> {
	let mut url = base.clone();

	url.path_segments_mut()
		.map_err(|_| Error::invalid_request(format!("{base} cannot be used as a base URL")))?
		.pop_if_empty()
		.extend(path.split('/').filter(|segment| !segment.is_empty()));

	Ok(url)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn stay_windows_must_move_forward() {
		let (start, end) = parse_stay("2025-06-01", "2025-06-05").expect("Window should parse.");

		assert_eq!((end - start).whole_days(), 4);
		assert!(matches!(
			parse_stay("2025-06-05", "2025-06-05"),
			Err(Error::InvalidRequest { .. })
		));
		assert!(matches!(parse_stay("06/01/2025", "2025-06-05"), Err(Error::InvalidRequest { .. })));
	}

	#[test]
	fn endpoints_keep_the_base_path() {
		let base = Url::parse("https://pms.example.com/v1/").expect("Base URL should parse.");

		assert_eq!(
			endpoint(&base, "listings").expect("Endpoint should join.").as_str(),
			"https://pms.example.com/v1/listings"
		);

		let base = Url::parse("https://pms.example.com/api").expect("Base URL should parse.");

		assert_eq!(
			endpoint(&base, "reservations/quotes").expect("Endpoint should join.").as_str(),
			"https://pms.example.com/api/reservations/quotes"
		);
	}
}
