//! Typed views of upstream listing payloads, plus the fallback adapter for payloads whose
//! records sit at an unknown depth.

// self
use crate::_prelude::*;

/// One page of the listings endpoint.
///
/// Both the cursor shape (`{results, pagination: {cursor: {next}}}`) and the counted shape
/// (`{count, results}`) deserialize into this struct. Records stay untyped until
/// [`ListingsPage::records`] so one malformed record cannot sink the page.
#[derive(Debug, Default, Deserialize)]
pub struct ListingsPage {
	/// Listing records on this page, as sent.
	#[serde(default, deserialize_with = "null_as_empty")]
	pub results: Vec<Value>,
	/// Cursor block, when the endpoint paginates by cursor.
	#[serde(default)]
	pub pagination: Option<Pagination>,
	/// Total count, when the endpoint reports one.
	#[serde(default)]
	pub count: Option<u64>,
}
impl ListingsPage {
	/// Cursor for the following page, if the upstream supplied a non-empty one.
	pub fn next_cursor(&self) -> Option<&str> {
		self.pagination
			.as_ref()
			.and_then(|p| p.cursor.as_ref())
			.and_then(|c| c.next.as_deref())
			.filter(|next| !next.is_empty())
	}

	/// Typed records in page order; records that fail to parse are logged and skipped.
	pub fn records(&self) -> Vec<RawListing> {
		self.results.iter().filter_map(RawListing::from_value).collect()
	}
}

/// Pagination block of a listings page.
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
	/// Cursor pair.
	#[serde(default)]
	pub cursor: Option<CursorBlock>,
}

/// Cursor pair of a listings page.
#[derive(Debug, Default, Deserialize)]
pub struct CursorBlock {
	/// Cursor for the next page.
	#[serde(default)]
	pub next: Option<String>,
}

/// Listing record as the upstream sends it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawListing {
	/// Database identifier, preferred over `id` when both are present.
	#[serde(default, rename = "_id")]
	pub object_id: Option<String>,
	/// Public identifier.
	#[serde(default)]
	pub id: Option<String>,
	/// Secondary identifier some units are known by.
	#[serde(default)]
	pub alternate_id: Option<String>,
	/// Public title.
	#[serde(default)]
	pub title: Option<String>,
	/// Internal nickname, used when no title is set.
	#[serde(default)]
	pub nickname: Option<String>,
	/// Postal address.
	#[serde(default)]
	pub address: Option<RawAddress>,
	/// Cover picture.
	#[serde(default)]
	pub picture: Option<RawPicture>,
	/// Photo gallery.
	#[serde(default, deserialize_with = "null_as_empty")]
	pub pictures: Vec<RawPicture>,
	/// Bedroom count.
	#[serde(default)]
	pub bedrooms: Option<f64>,
	/// Bathroom count.
	#[serde(default)]
	pub bathrooms: Option<f64>,
	/// Maximum guests.
	#[serde(default)]
	pub accommodates: Option<u32>,
	/// Price block.
	#[serde(default)]
	pub prices: Option<RawPrices>,
	/// Overall availability status.
	#[serde(default)]
	pub status: Option<String>,
	/// Per-day calendar entries.
	#[serde(default, deserialize_with = "null_as_empty")]
	pub calendar: Vec<RawDay>,
	/// Per-day entries under the older `availability` key.
	#[serde(default, deserialize_with = "null_as_empty")]
	pub availability: Vec<RawDay>,
	/// Per-day entries under the older `days` key.
	#[serde(default, deserialize_with = "null_as_empty")]
	pub days: Vec<RawDay>,
}
impl RawListing {
	/// Parses one record, logging and discarding it when its shape is unusable.
	pub fn from_value(value: &Value) -> Option<Self> {
		match Self::deserialize(value) {
			Ok(record) => Some(record),
			Err(e) => {
				tracing::warn!(error = %e, "Skipped a listing record that failed to parse.");

				None
			},
		}
	}

	/// Identifier of the record: `_id` when set, else `id`.
	pub fn primary_id(&self) -> Option<&str> {
		[self.object_id.as_deref(), self.id.as_deref()]
			.into_iter()
			.flatten()
			.find(|id| !id.is_empty())
	}

	/// Per-day entries from the first non-empty calendar key.
	pub fn calendar_days(&self) -> &[RawDay] {
		[&self.calendar, &self.availability, &self.days]
			.into_iter()
			.find(|days| !days.is_empty())
			.map(Vec::as_slice)
			.unwrap_or_default()
	}

	/// Returns `true` when any identifier equals one of `ids`.
	pub fn matches_any(&self, ids: &[&str]) -> bool {
		[self.object_id.as_deref(), self.id.as_deref(), self.alternate_id.as_deref()]
			.into_iter()
			.flatten()
			.any(|own| ids.contains(&own))
	}
}

/// Postal address of a listing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawAddress {
	/// Full formatted address.
	#[serde(default)]
	pub full: Option<String>,
	/// City component.
	#[serde(default)]
	pub city: Option<String>,
}

/// Picture in one or more resolutions.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawPicture {
	/// Full-size image.
	#[serde(default)]
	pub original: Option<String>,
	/// Large rendition.
	#[serde(default)]
	pub large: Option<String>,
	/// Regular rendition.
	#[serde(default)]
	pub regular: Option<String>,
	/// Thumbnail rendition.
	#[serde(default)]
	pub thumbnail: Option<String>,
}
impl RawPicture {
	/// Best available URL, largest first.
	pub fn best_url(&self) -> Option<&str> {
		[&self.original, &self.large, &self.regular, &self.thumbnail]
			.into_iter()
			.find_map(|url| url.as_deref().filter(|u| !u.is_empty()))
	}
}

/// Price block of a listing.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPrices {
	/// Nightly base price.
	#[serde(default)]
	pub base_price: Option<f64>,
	/// ISO currency code.
	#[serde(default)]
	pub currency: Option<String>,
	/// Cleaning fee per stay.
	#[serde(default)]
	pub cleaning_fee: Option<f64>,
}

/// Calendar day as the upstream sends it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDay {
	/// Local date (`YYYY-MM-DD`).
	#[serde(default)]
	pub date: Option<String>,
	/// Explicit availability flag.
	#[serde(default)]
	pub is_available: Option<bool>,
	/// Alternative availability flag used by older payloads.
	#[serde(default)]
	pub available: Option<bool>,
	/// Day status such as `AVAILABLE` or `BOOKED`.
	#[serde(default)]
	pub status: Option<String>,
	/// Nightly price.
	#[serde(default)]
	pub price: Option<f64>,
	/// Minimum nights for a stay starting this day.
	#[serde(default)]
	pub min_nights: Option<u32>,
}
impl RawDay {
	const BLOCKING_STATUSES: [&'static str; 4] = ["BLOCKED", "UNAVAILABLE", "BOOKED", "RESERVED"];

	/// Returns `true` when the day is explicitly unavailable.
	pub fn is_blocked(&self) -> bool {
		if self.is_available == Some(false) || self.available == Some(false) {
			return true;
		}

		self.status.as_deref().is_some_and(|status| {
			Self::BLOCKING_STATUSES.iter().any(|blocked| status.eq_ignore_ascii_case(blocked))
		})
	}
}

/// Locates listing-like records inside payloads whose shape is not known statically.
pub trait LegacyShapeAdapter
where
	Self: Send + Sync,
{
	/// Returns candidate records found anywhere in `payload`, in document order.
	fn extract_records(&self, payload: &Value) -> Vec<RawListing>;
}

/// Depth-bounded walk that collects every object carrying an identifier and at least one
/// listing field.
#[derive(Clone, Debug)]
pub struct NestedRecordWalker {
	max_depth: usize,
}
impl NestedRecordWalker {
	const LISTING_FIELDS: [&'static str; 7] =
		["calendar", "availability", "days", "status", "title", "nickname", "address"];

	/// Creates a walker that stops descending after `max_depth` levels.
	pub fn new(max_depth: usize) -> Self {
		Self { max_depth }
	}

	fn looks_like_record(object: &serde_json::Map<String, Value>) -> bool {
		let has_id = ["_id", "id"].iter().any(|key| object.get(*key).is_some_and(Value::is_string));

		has_id && Self::LISTING_FIELDS.iter().any(|key| object.contains_key(*key))
	}
}
impl Default for NestedRecordWalker {
	fn default() -> Self {
		Self::new(8)
	}
}
impl LegacyShapeAdapter for NestedRecordWalker {
	fn extract_records(&self, payload: &Value) -> Vec<RawListing> {
		let mut records = Vec::new();
		let mut stack = vec![(payload, 0_usize)];

		while let Some((value, depth)) = stack.pop() {
			if depth > self.max_depth {
				continue;
			}

			match value {
				Value::Object(object) if Self::looks_like_record(object) =>
					records.extend(RawListing::from_value(value)),
				Value::Object(object) =>
					stack.extend(object.values().rev().map(|child| (child, depth + 1))),
				Value::Array(items) => stack.extend(items.iter().rev().map(|child| (child, depth + 1))),
				_ => (),
			}
		}

		records
	}
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
	D: serde::Deserializer<'de>,
	T: Deserialize<'de>,
{
	Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
