//! The two upstream API surfaces a token can be issued for.

// self
use crate::_prelude::*;

/// Error returned when a scope label cannot be recognized.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Unknown upstream scope: {value}.")]
pub struct UnknownScope {
	/// The rejected label.
	pub value: String,
}

/// Upstream OAuth scope; each scope owns an independent token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiScope {
	/// General listing and availability access.
	OpenApi,
	/// Booking-engine access used for quotes.
	BookingEngine,
}
impl ApiScope {
	/// Every scope, in refresh order.
	pub const ALL: [ApiScope; 2] = [ApiScope::OpenApi, ApiScope::BookingEngine];

	/// Scope string sent in the client-credentials request.
	pub const fn oauth_scope(self) -> &'static str {
		match self {
			ApiScope::OpenApi => "open-api",
			ApiScope::BookingEngine => "booking_engine:api",
		}
	}

	/// Stable label suitable for span fields, metric labels, and file names.
	pub const fn as_str(self) -> &'static str {
		match self {
			ApiScope::OpenApi => "open_api",
			ApiScope::BookingEngine => "booking_engine",
		}
	}
}
impl Display for ApiScope {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for ApiScope {
	type Err = UnknownScope;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let view = s.trim();

		Self::ALL
			.into_iter()
			.find(|scope| {
				scope.as_str().eq_ignore_ascii_case(view)
					|| scope.oauth_scope().eq_ignore_ascii_case(view)
			})
			.ok_or_else(|| UnknownScope { value: view.to_owned() })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn parses_labels_and_oauth_strings() {
		assert_eq!("open_api".parse::<ApiScope>(), Ok(ApiScope::OpenApi));
		assert_eq!("booking_engine:api".parse::<ApiScope>(), Ok(ApiScope::BookingEngine));
		assert_eq!(" OPEN-API ".parse::<ApiScope>(), Ok(ApiScope::OpenApi));
		assert!("admin".parse::<ApiScope>().is_err());
	}

	#[test]
	fn serializes_as_screaming_snake_case() {
		let payload =
			serde_json::to_string(&ApiScope::BookingEngine).expect("Scope should serialize.");

		assert_eq!(payload, "\"BOOKING_ENGINE\"");
	}
}
