//! Availability resolution through an ordered chain of upstream lookups.
//!
//! The chain tries the primary id, then the city, then the alternate id, stopping at the first
//! response that contains a matching record. Lookups that find nothing or fail are reported in
//! [`AvailabilityResult::errors`] instead of failing the call; only token failures and local
//! faults propagate as [`Error`].

// crates.io
use time::Date;
// self
use crate::{
	_prelude::*,
	auth::ApiScope,
	cache::BoundedCache,
	http::UpstreamRequest,
	services::{
		UpstreamCall, endpoint, parse_date, parse_stay,
		shape::{LegacyShapeAdapter, ListingsPage, NestedRecordWalker, RawDay, RawListing},
	},
};

const CALENDAR_FIELDS: &str = "_id alternateId title nickname status calendar";

/// Lookup strategies, in the order they are attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
	/// Query by primary id (plus city when given).
	ById,
	/// Query by city alone; the record must carry the primary or alternate id.
	ByCity,
	/// Query by alternate id (plus city when given).
	ByAlternateId,
}
impl StrategyName {
	/// Stable label used in error entries and logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			StrategyName::ById => "by_id",
			StrategyName::ByCity => "by_city",
			StrategyName::ByAlternateId => "by_alternate_id",
		}
	}
}
impl Display for StrategyName {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Availability question for one listing and stay.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AvailabilityQuery {
	/// Primary listing id.
	pub id: String,
	/// Stay start (`YYYY-MM-DD`).
	pub start_date: String,
	/// Stay end (`YYYY-MM-DD`, exclusive).
	pub end_date: String,
	/// Guests that must fit.
	pub min_occupancy: u32,
	/// City hint, enabling the city strategy.
	pub city: Option<String>,
	/// Secondary id, enabling the alternate-id strategy.
	pub alternate_id: Option<String>,
}
impl AvailabilityQuery {
	/// Creates a query without city or alternate id.
	pub fn new(
		id: impl Into<String>,
		start_date: impl Into<String>,
		end_date: impl Into<String>,
		min_occupancy: u32,
	) -> Self {
		Self {
			id: id.into(),
			start_date: start_date.into(),
			end_date: end_date.into(),
			min_occupancy,
			city: None,
			alternate_id: None,
		}
	}

	/// Adds the city hint.
	pub fn with_city(mut self, city: impl Into<String>) -> Self {
		self.city = Some(city.into());

		self
	}

	/// Adds the alternate id.
	pub fn with_alternate_id(mut self, alternate_id: impl Into<String>) -> Self {
		self.alternate_id = Some(alternate_id.into());

		self
	}

	/// Strategies applicable to this query, in order.
	pub fn strategies(&self) -> Vec<StrategyName> {
		let mut strategies = vec![StrategyName::ById];

		if self.city().is_some() {
			strategies.push(StrategyName::ByCity);
		}
		if self.alternate_id().is_some() {
			strategies.push(StrategyName::ByAlternateId);
		}

		strategies
	}

	fn city(&self) -> Option<&str> {
		self.city.as_deref().map(str::trim).filter(|city| !city.is_empty())
	}

	fn alternate_id(&self) -> Option<&str> {
		self.alternate_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
	}

	fn known_ids(&self) -> Vec<&str> {
		let mut ids = vec![self.id.as_str()];

		ids.extend(self.alternate_id());

		ids
	}

	fn validate(&self) -> Result<(Date, Date)> {
		if self.id.trim().is_empty() {
			return Err(Error::invalid_request("listing id must not be empty"));
		}
		if self.min_occupancy == 0 {
			return Err(Error::invalid_request("minimum occupancy must be at least 1"));
		}

		parse_stay(&self.start_date, &self.end_date)
	}
}

/// One calendar day of the matched record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAvailability {
	/// Local date, when the upstream supplied one.
	pub date: Option<String>,
	/// `false` when the day is explicitly unavailable.
	pub is_available: bool,
	/// Upstream status label.
	pub status: Option<String>,
	/// Nightly price.
	pub price: Option<f64>,
	/// Minimum nights for a stay starting this day.
	pub min_nights: Option<u32>,
}
impl From<&RawDay> for DayAvailability {
	fn from(day: &RawDay) -> Self {
		Self {
			date: day.date.clone(),
			is_available: !day.is_blocked(),
			status: day.status.clone(),
			price: day.price,
			min_nights: day.min_nights,
		}
	}
}

/// Outcome of an availability lookup.
///
/// `is_available == None` means unknown: no record matched, or the matched record carried
/// neither calendar days nor a status. Callers must not read `None` as `false`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResult {
	/// Verdict for the whole stay.
	pub is_available: Option<bool>,
	/// Calendar days inside the stay.
	pub availability: Vec<DayAvailability>,
	/// Response of the strategy that matched.
	pub raw_upstream_response: Option<Value>,
	/// One entry per strategy that found nothing or failed.
	pub errors: Vec<String>,
	/// Strategy that matched.
	pub strategy: Option<StrategyName>,
	/// `true` when served from the cache.
	pub cached: bool,
}
impl AvailabilityResult {
	fn unresolved(errors: Vec<String>) -> Self {
		Self {
			is_available: None,
			availability: Vec::new(),
			raw_upstream_response: None,
			errors,
			strategy: None,
			cached: false,
		}
	}
}

/// Resolves availability through the fallback chain and caches the outcome.
pub struct AvailabilityResolver {
	base_url: Url,
	cache: BoundedCache<AvailabilityQuery, AvailabilityResult>,
	legacy: Box<dyn LegacyShapeAdapter>,
}
impl AvailabilityResolver {
	/// Creates a resolver querying `{base_url}/listings`.
	pub fn new(base_url: Url, ttl: Duration, max_entries: usize) -> Self {
		Self {
			base_url,
			cache: BoundedCache::new(ttl, max_entries),
			legacy: Box::new(NestedRecordWalker::default()),
		}
	}

	/// Replaces the adapter used when a response does not match the typed page shape.
	pub fn with_legacy_adapter(mut self, adapter: impl 'static + LegacyShapeAdapter) -> Self {
		self.legacy = Box::new(adapter);

		self
	}

	/// Answers `query`, from the cache when the same question was resolved within the TTL.
	pub async fn resolve(
		&self,
		upstream: &dyn UpstreamCall,
		query: &AvailabilityQuery,
	) -> Result<AvailabilityResult> {
		let (start, end) = query.validate()?;

		if let Some(mut hit) = self.cache.get(query, OffsetDateTime::now_utc()) {
			tracing::debug!(id = %query.id, "Availability served from cache.");

			hit.cached = true;

			return Ok(hit);
		}

		let url = endpoint(&self.base_url, "listings")?;
		let mut errors = Vec::new();
		let mut cacheable = true;

		for strategy in query.strategies() {
			let request = strategy_request(url.clone(), strategy, query);

			match upstream.call(ApiScope::OpenApi, request).await {
				Ok(payload) => match self.find_record(&payload, query) {
					Some(record) => {
						let result = matched(record, payload, strategy, errors, (start, end));

						if cacheable {
							self.cache.insert(query.clone(), result.clone(), OffsetDateTime::now_utc());
						}

						return Ok(result);
					},
					None => errors.push(format!("{strategy}: no matching record")),
				},
				Err(e) if e.is_rate_limited() => {
					tracing::warn!(%strategy, error = %e, "Availability lookup stayed rate limited.");
					errors.push(format!("{strategy}: {e}"));

					cacheable = false;

					break;
				},
				Err(
					e @ (Error::Upstream { .. }
					| Error::Timeout
					| Error::Transport(_)
					| Error::Parse { .. }),
				) => {
					tracing::warn!(%strategy, error = %e, "Availability lookup failed.");
					errors.push(format!("{strategy}: {e}"));

					cacheable = false;
				},
				Err(e) => return Err(e),
			}
		}

		let result = AvailabilityResult::unresolved(errors);

		if cacheable {
			self.cache.insert(query.clone(), result.clone(), OffsetDateTime::now_utc());
		}

		Ok(result)
	}

	fn find_record(&self, payload: &Value, query: &AvailabilityQuery) -> Option<RawListing> {
		let ids = query.known_ids();
		let typed =
			ListingsPage::deserialize(payload).map(|page| page.records()).unwrap_or_default();

		if let Some(record) = typed.into_iter().find(|record| record.matches_any(&ids)) {
			return Some(record);
		}

		self.legacy.extract_records(payload).into_iter().find(|record| record.matches_any(&ids))
	}
}
impl Debug for AvailabilityResolver {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AvailabilityResolver")
			.field("base_url", &self.base_url.as_str())
			.field("cached_entries", &self.cache.len())
			.finish_non_exhaustive()
	}
}

fn strategy_request(url: Url, strategy: StrategyName, query: &AvailabilityQuery) -> UpstreamRequest {
	let available = serde_json::json!({
		"checkIn": query.start_date,
		"checkOut": query.end_date,
		"minOccupancy": query.min_occupancy,
	});
	let mut request = UpstreamRequest::get(url);

	match strategy {
		StrategyName::ById => request = request.query("ids", query.id.as_str()),
		StrategyName::ByAlternateId =>
			if let Some(alternate_id) = query.alternate_id() {
				request = request.query("ids", alternate_id);
			},
		StrategyName::ByCity => (),
	}

	if let Some(city) = query.city() {
		request = request.query("city", city);
	}

	request.query("available", available.to_string()).query("fields", CALENDAR_FIELDS)
}

fn matched(
	record: RawListing,
	payload: Value,
	strategy: StrategyName,
	errors: Vec<String>,
	(start, end): (Date, Date),
) -> AvailabilityResult {
	let days = record
		.calendar_days()
		.iter()
		.filter(|day| within_stay(day, start, end))
		.map(DayAvailability::from)
		.collect::<Vec<_>>();
	let is_available = if days.is_empty() {
		record.status.as_deref().map(|status| status.trim().eq_ignore_ascii_case("AVAILABLE"))
	} else {
		Some(days.iter().all(|day| day.is_available))
	};

	AvailabilityResult {
		is_available,
		availability: days,
		raw_upstream_response: Some(payload),
		errors,
		strategy: Some(strategy),
		cached: false,
	}
}

// Days without a parseable date are kept; the upstream already filtered by the stay.
fn within_stay(day: &RawDay, start: Date, end: Date) -> bool {
	match day.date.as_deref().map(|raw| parse_date("calendar date", raw)) {
		Some(Ok(date)) => start <= date && date < end,
		_ => true,
	}
}
