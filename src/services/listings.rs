//! Cursor-paginated listings walk with normalization, de-duplication, and a single-slot cache.

// std
use std::collections::HashSet;
// self
use crate::{
	_prelude::*,
	auth::ApiScope,
	cache::{SingleSlotCache, fingerprint},
	http::UpstreamRequest,
	services::{
		UpstreamCall, endpoint, parse_stay,
		shape::{ListingsPage, RawListing},
	},
};

/// Hard stop for runaway pagination.
pub const MAX_PAGES: usize = 25;

/// Filters accepted by the listings endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingQuery {
	/// Stay start (`YYYY-MM-DD`); requires `check_out`.
	pub check_in: Option<String>,
	/// Stay end (`YYYY-MM-DD`); requires `check_in`.
	pub check_out: Option<String>,
	/// Minimum guest capacity for the stay.
	pub min_occupancy: Option<u32>,
	/// City filter.
	pub city: Option<String>,
	/// Tag filter.
	pub tags: Vec<String>,
	/// Listing id filter.
	pub ids: Vec<String>,
	/// Page size override.
	pub page_size: Option<u32>,
}
impl ListingQuery {
	/// Restricts the result to listings free for the whole stay.
	pub fn available_between(
		mut self,
		check_in: impl Into<String>,
		check_out: impl Into<String>,
		min_occupancy: u32,
	) -> Self {
		self.check_in = Some(check_in.into());
		self.check_out = Some(check_out.into());
		self.min_occupancy = Some(min_occupancy);

		self
	}

	/// Restricts the result to one city.
	pub fn city(mut self, city: impl Into<String>) -> Self {
		self.city = Some(city.into());

		self
	}

	/// Adds a tag filter.
	pub fn tag(mut self, tag: impl Into<String>) -> Self {
		self.tags.push(tag.into());

		self
	}

	/// Adds an id filter.
	pub fn id(mut self, id: impl Into<String>) -> Self {
		self.ids.push(id.into());

		self
	}

	/// Overrides the configured page size.
	pub fn page_size(mut self, size: u32) -> Self {
		self.page_size = Some(size);

		self
	}

	fn validate(&self) -> Result<()> {
		match (&self.check_in, &self.check_out) {
			(Some(check_in), Some(check_out)) => parse_stay(check_in, check_out).map(|_| ()),
			(None, None) => Ok(()),
			_ => Err(Error::invalid_request("check-in and check-out must be given together")),
		}?;

		if self.min_occupancy == Some(0) {
			return Err(Error::invalid_request("minimum occupancy must be at least 1"));
		}
		if self.page_size == Some(0) {
			return Err(Error::invalid_request("page size must be at least 1"));
		}

		Ok(())
	}

	fn cache_key(&self, page_size: u32) -> String {
		let mut tags = self.tags.clone();
		let mut ids = self.ids.clone();

		tags.sort();
		ids.sort();

		fingerprint([
			format!("check_in={}", self.check_in.as_deref().unwrap_or_default()),
			format!("check_out={}", self.check_out.as_deref().unwrap_or_default()),
			format!("min_occupancy={}", self.min_occupancy.unwrap_or_default()),
			format!("city={}", self.city.as_deref().unwrap_or_default().to_lowercase()),
			format!("tags={}", tags.join(",")),
			format!("ids={}", ids.join(",")),
			format!("limit={page_size}"),
		])
	}

	fn available_filter(&self) -> Option<String> {
		let (check_in, check_out) = (self.check_in.as_ref()?, self.check_out.as_ref()?);
		let mut filter = serde_json::json!({ "checkIn": check_in, "checkOut": check_out });

		if let Some(min_occupancy) = self.min_occupancy {
			filter["minOccupancy"] = min_occupancy.into();
		}

		Some(filter.to_string())
	}
}

/// Normalized listing handed to the website.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
	/// Primary identifier.
	pub id: String,
	/// Title, falling back to the nickname.
	pub title: String,
	/// Full address.
	pub address: Option<String>,
	/// City.
	pub city: Option<String>,
	/// Cover picture URL.
	pub picture: Option<String>,
	/// Gallery URLs in upstream order.
	pub photo_gallery: Vec<String>,
	/// Bedroom count.
	pub bedrooms: Option<f64>,
	/// Bathroom count.
	pub bathrooms: Option<f64>,
	/// Maximum guests.
	pub accommodates: Option<u32>,
	/// Nightly base price.
	pub base_price: Option<f64>,
	/// ISO currency code.
	pub currency: Option<String>,
	/// Cleaning fee per stay.
	pub cleaning_fee: Option<f64>,
}
impl Listing {
	/// Flattens a raw record; records without an identifier are dropped.
	pub fn from_raw(raw: RawListing) -> Option<Self> {
		let id = raw.primary_id()?.to_owned();
		let photo_gallery = raw
			.pictures
			.iter()
			.filter_map(|picture| picture.best_url().map(ToOwned::to_owned))
			.collect::<Vec<_>>();
		let picture = raw
			.picture
			.as_ref()
			.and_then(|picture| picture.best_url().map(ToOwned::to_owned))
			.or_else(|| photo_gallery.first().cloned());
		let (address, city) = match raw.address {
			Some(address) => (address.full, address.city),
			None => (None, None),
		};
		let prices = raw.prices.unwrap_or_default();

		Some(Self {
			id,
			title: raw.title.or(raw.nickname).unwrap_or_default(),
			address,
			city,
			picture,
			photo_gallery,
			bedrooms: raw.bedrooms,
			bathrooms: raw.bathrooms,
			accommodates: raw.accommodates,
			base_price: prices.base_price,
			currency: prices.currency,
			cleaning_fee: prices.cleaning_fee,
		})
	}
}

/// Listings returned to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingsResponse {
	/// De-duplicated listings in upstream order.
	pub results: Vec<Listing>,
	/// `true` when served from the cache.
	pub cached: bool,
}

/// Walks the listings endpoint to completion and caches the last result set.
#[derive(Debug)]
pub struct ListingsFetcher {
	base_url: Url,
	page_size: u32,
	cache: SingleSlotCache<Vec<Listing>>,
}
impl ListingsFetcher {
	/// Creates a fetcher for `{base_url}/listings`.
	pub fn new(base_url: Url, page_size: u32, ttl: Duration) -> Self {
		Self { base_url, page_size: page_size.max(1), cache: SingleSlotCache::new(ttl) }
	}

	/// Returns every listing matching `query`, from the cache when the same filters were
	/// fetched within the TTL.
	///
	/// A failure on any page fails the whole walk; nothing partial is cached or returned.
	pub async fn fetch_all(
		&self,
		upstream: &dyn UpstreamCall,
		query: &ListingQuery,
	) -> Result<ListingsResponse> {
		query.validate()?;

		let page_size = query.page_size.unwrap_or(self.page_size);
		let key = query.cache_key(page_size);

		if let Some(results) = self.cache.get(&key, OffsetDateTime::now_utc()) {
			tracing::debug!(count = results.len(), "Listings served from cache.");

			return Ok(ListingsResponse { results, cached: true });
		}

		let results = self.walk(upstream, query, page_size).await?;

		self.cache.insert(key, results.clone(), OffsetDateTime::now_utc());

		Ok(ListingsResponse { results, cached: false })
	}

	/// Drops the cached result set.
	pub fn clear_cache(&self) {
		self.cache.clear();
	}

	async fn walk(
		&self,
		upstream: &dyn UpstreamCall,
		query: &ListingQuery,
		page_size: u32,
	) -> Result<Vec<Listing>> {
		let url = endpoint(&self.base_url, "listings")?;
		let mut listings = Vec::new();
		let mut seen = HashSet::new();
		let mut cursor = None::<String>;

		for page_number in 1..=MAX_PAGES {
			let mut request = page_request(url.clone(), query, page_size);

			if let Some(cursor) = &cursor {
				request = request.query("cursor", cursor.as_str());
			}

			let payload = upstream.call(ApiScope::OpenApi, request).await?;
			let page = parse_page(payload)?;

			if page.results.is_empty() {
				break;
			}

			let next = page.next_cursor().map(ToOwned::to_owned);

			for listing in page.records().into_iter().filter_map(Listing::from_raw) {
				if seen.insert(listing.id.clone()) {
					listings.push(listing);
				}
			}

			match next {
				Some(next) if page_number < MAX_PAGES => cursor = Some(next),
				Some(_) => tracing::warn!(
					pages = MAX_PAGES,
					count = listings.len(),
					"Listings walk hit the page guard; stopping."
				),
				None => break,
			}
		}

		Ok(listings)
	}
}

fn page_request(url: Url, query: &ListingQuery, page_size: u32) -> UpstreamRequest {
	let mut request = UpstreamRequest::get(url).query("limit", page_size.to_string());

	if !query.ids.is_empty() {
		request = request.query("ids", query.ids.join(","));
	}
	if let Some(city) = &query.city {
		request = request.query("city", city.as_str());
	}
	if !query.tags.is_empty() {
		request = request.query("tags", query.tags.join(","));
	}
	if let Some(available) = query.available_filter() {
		request = request.query("available", available);
	}

	request
}

pub(crate) fn parse_page(payload: Value) -> Result<ListingsPage> {
	if payload.is_null() {
		return Ok(ListingsPage::default());
	}

	serde_path_to_error::deserialize(payload).map_err(|source| Error::Parse { source })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn cache_keys_ignore_filter_order() {
		let a = ListingQuery::default().tag("pool").tag("beach").id("b").id("a");
		let b = ListingQuery::default().tag("beach").tag("pool").id("a").id("b");

		assert_eq!(a.cache_key(100), b.cache_key(100));
		assert_ne!(a.cache_key(100), a.cache_key(50));
		assert_ne!(a.cache_key(100), a.clone().city("Miami").cache_key(100));
	}

	#[test]
	fn available_filter_is_json() {
		let query = ListingQuery::default().available_between("2025-06-01", "2025-06-05", 2);
		let filter: Value = serde_json::from_str(
			&query.available_filter().expect("A dated query should carry a filter."),
		)
		.expect("Filter should be JSON.");

		assert_eq!(
			filter,
			serde_json::json!({"checkIn": "2025-06-01", "checkOut": "2025-06-05", "minOccupancy": 2})
		);
		assert!(ListingQuery::default().available_filter().is_none());
	}

	#[test]
	fn half_open_date_filters_are_rejected() {
		let query = ListingQuery { check_in: Some("2025-06-01".into()), ..Default::default() };

		assert!(matches!(query.validate(), Err(Error::InvalidRequest { .. })));
	}

	#[test]
	fn raw_records_flatten_into_listings() {
		let raw: RawListing = serde_json::from_value(serde_json::json!({
			"_id": "unit-1",
			"nickname": "Beach House",
			"address": {"full": "1 Ocean Dr, Miami", "city": "Miami"},
			"pictures": [{"thumbnail": "t1"}, {"original": "o2", "thumbnail": "t2"}],
			"bedrooms": 2,
			"accommodates": 4,
			"prices": {"basePrice": 180.0, "currency": "USD", "cleaningFee": 75}
		}))
		.expect("Raw listing should parse.");
		let listing = Listing::from_raw(raw).expect("A record with an id should normalize.");

		assert_eq!(listing.title, "Beach House");
		assert_eq!(listing.city.as_deref(), Some("Miami"));
		assert_eq!(listing.picture.as_deref(), Some("t1"));
		assert_eq!(listing.photo_gallery, ["t1", "o2"]);
		assert_eq!(listing.base_price, Some(180.0));
		assert_eq!(listing.cleaning_fee, Some(75.0));
		assert!(Listing::from_raw(RawListing::default()).is_none());
	}
}
