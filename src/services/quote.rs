//! Quote creation against the booking-engine API with a short-lived quote cache.
//!
//! The raw upstream payload is always returned. Pricing is additionally extracted from the
//! payload shapes the booking engine is known to produce; an unrecognized shape yields empty
//! pricing rather than a guessed number.

// self
use crate::{
	_prelude::*,
	auth::ApiScope,
	cache::BoundedCache,
	http::UpstreamRequest,
	services::{UpstreamCall, endpoint, parse_stay},
};

/// Stay to price.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QuoteRequest {
	/// Listing to price.
	pub listing_id: String,
	/// Stay start (`YYYY-MM-DD`).
	pub check_in: String,
	/// Stay end (`YYYY-MM-DD`).
	pub check_out: String,
	/// Number of guests.
	pub guests_count: u32,
}
impl QuoteRequest {
	/// Creates a request.
	pub fn new(
		listing_id: impl Into<String>,
		check_in: impl Into<String>,
		check_out: impl Into<String>,
		guests_count: u32,
	) -> Self {
		Self {
			listing_id: listing_id.into(),
			check_in: check_in.into(),
			check_out: check_out.into(),
			guests_count,
		}
	}

	fn validate(&self) -> Result<()> {
		if self.listing_id.trim().is_empty() {
			return Err(Error::invalid_request("listing id must not be empty"));
		}
		if self.guests_count == 0 {
			return Err(Error::invalid_request("guests count must be at least 1"));
		}

		parse_stay(&self.check_in, &self.check_out).map(|_| ())
	}

	fn body(&self) -> Value {
		serde_json::json!({
			"listingId": self.listing_id,
			"checkInDateLocalized": self.check_in,
			"checkOutDateLocalized": self.check_out,
			"guestsCount": self.guests_count,
		})
	}
}

/// Nightly rate of a priced stay.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NightlyRate {
	/// Local date.
	pub date: Option<String>,
	/// Price for the night.
	pub price: f64,
}

/// Named fee line.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteFee {
	/// Fee label.
	pub name: String,
	/// Fee amount.
	pub amount: f64,
}

/// Pricing extracted from a quote payload; every field is empty when the shape is unknown.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotePricing {
	/// Price the guest pays for the stay.
	pub total: Option<f64>,
	/// Amount the host nets after channel and service deductions.
	pub host_payout: Option<f64>,
	/// Per-night prices.
	pub nightly: Vec<NightlyRate>,
	/// ISO currency code.
	pub currency: Option<String>,
	/// Fee lines.
	pub fees: Vec<QuoteFee>,
	/// Total taxes.
	pub taxes: Option<f64>,
}

/// Price quote returned to the website.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
	/// Upstream quote id, when present.
	pub quote_id: Option<String>,
	/// Listing priced.
	pub listing_id: String,
	/// Stay start.
	pub check_in: String,
	/// Stay end.
	pub check_out: String,
	/// Number of guests.
	pub guests_count: u32,
	/// Structured pricing.
	pub pricing: QuotePricing,
	/// Upstream payload as received.
	pub raw: Value,
	/// `true` when served from the cache.
	pub cached: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Money {
	#[serde(default)]
	currency: Option<String>,
	#[serde(default)]
	total_price: Option<f64>,
	#[serde(default)]
	host_payout: Option<f64>,
	#[serde(default)]
	sub_total_price: Option<f64>,
	#[serde(default)]
	fare_cleaning: Option<f64>,
	#[serde(default)]
	total_taxes: Option<f64>,
	#[serde(default)]
	invoice_items: Vec<InvoiceItem>,
}
impl Money {
	fn total(&self) -> Option<f64> {
		self.total_price.or(self.sub_total_price)
	}

	fn fees(&self) -> Vec<QuoteFee> {
		let itemized = self
			.invoice_items
			.iter()
			.filter(|item| item.is_fee())
			.map(|item| QuoteFee { name: item.title.clone(), amount: item.amount })
			.collect::<Vec<_>>();

		if !itemized.is_empty() {
			return itemized;
		}

		self.fare_cleaning
			.filter(|amount| *amount > 0.)
			.map(|amount| QuoteFee { name: "Cleaning fee".into(), amount })
			.into_iter()
			.collect()
	}

	fn taxes(&self) -> Option<f64> {
		self.total_taxes.or_else(|| {
			let taxes = self.invoice_items.iter().filter(|item| item.is_tax()).collect::<Vec<_>>();

			(!taxes.is_empty()).then(|| taxes.iter().map(|item| item.amount).sum())
		})
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceItem {
	title: String,
	amount: f64,
	#[serde(default, rename = "type")]
	kind: Option<String>,
}
impl InvoiceItem {
	fn kind(&self) -> &str {
		self.kind.as_deref().unwrap_or_default()
	}

	fn is_tax(&self) -> bool {
		self.kind().eq_ignore_ascii_case("TAX")
	}

	fn is_fee(&self) -> bool {
		!self.is_tax() && !self.kind().eq_ignore_ascii_case("ACCOMMODATION_FARE")
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RatePlanEnvelope {
	rates: Rates,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Rates {
	#[serde(default)]
	rate_plans: Vec<RatePlanEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RatePlanEntry {
	rate_plan: RatePlan,
}

#[derive(Debug, Default, Deserialize)]
struct RatePlan {
	#[serde(default)]
	money: Money,
	#[serde(default)]
	days: Vec<PricedDay>,
}

#[derive(Debug, Deserialize)]
struct PricedDay {
	#[serde(default)]
	date: Option<String>,
	price: f64,
	#[serde(default)]
	currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MoneyEnvelope {
	money: Money,
}

/// Upstream quote shapes understood by the pricing extractor.
#[derive(Debug)]
enum QuoteShape {
	/// `rates.ratePlans[].ratePlan.{money, days}`.
	RatePlan(RatePlan),
	/// Top-level `money` block.
	Money(Money),
	/// Anything else.
	Unknown,
}
impl QuoteShape {
	fn detect(raw: &Value) -> Self {
		let first_plan = RatePlanEnvelope::deserialize(raw)
			.ok()
			.and_then(|envelope| envelope.rates.rate_plans.into_iter().next());

		if let Some(entry) = first_plan {
			return Self::RatePlan(entry.rate_plan);
		}
		if let Ok(envelope) = MoneyEnvelope::deserialize(raw) {
			return Self::Money(envelope.money);
		}

		Self::Unknown
	}

	fn pricing(self) -> QuotePricing {
		match self {
			Self::RatePlan(plan) => {
				let nightly = plan
					.days
					.iter()
					.map(|day| NightlyRate { date: day.date.clone(), price: day.price })
					.collect();
				let currency = plan
					.money
					.currency
					.clone()
					.or_else(|| plan.days.iter().find_map(|day| day.currency.clone()));

				QuotePricing {
					total: plan.money.total(),
					host_payout: plan.money.host_payout,
					nightly,
					currency,
					fees: plan.money.fees(),
					taxes: plan.money.taxes(),
				}
			},
			Self::Money(money) => QuotePricing {
				total: money.total(),
				host_payout: money.host_payout,
				nightly: Vec::new(),
				currency: money.currency.clone(),
				fees: money.fees(),
				taxes: money.taxes(),
			},
			Self::Unknown => QuotePricing::default(),
		}
	}
}

/// Creates quotes and keeps recent ones per (listing, dates, guests).
#[derive(Debug)]
pub struct QuoteService {
	base_url: Url,
	cache: BoundedCache<QuoteRequest, Quote>,
}
impl QuoteService {
	/// Creates a service posting to `{base_url}/reservations/quotes`.
	pub fn new(base_url: Url, ttl: Duration, max_entries: usize) -> Self {
		Self { base_url, cache: BoundedCache::new(ttl, max_entries) }
	}

	/// Returns a quote for `request`, reusing one created within the TTL.
	pub async fn create_quote(
		&self,
		upstream: &dyn UpstreamCall,
		request: &QuoteRequest,
	) -> Result<Quote> {
		request.validate()?;

		if let Some(mut hit) = self.cache.get(request, OffsetDateTime::now_utc()) {
			tracing::debug!(listing_id = %request.listing_id, "Quote served from cache.");

			hit.cached = true;

			return Ok(hit);
		}

		let url = endpoint(&self.base_url, "reservations/quotes")?;
		let raw = upstream
			.call(ApiScope::BookingEngine, UpstreamRequest::post_json(url, request.body()))
			.await?;
		let quote = Quote {
			quote_id: quote_id(&raw),
			listing_id: request.listing_id.clone(),
			check_in: request.check_in.clone(),
			check_out: request.check_out.clone(),
			guests_count: request.guests_count,
			pricing: QuoteShape::detect(&raw).pricing(),
			raw,
			cached: false,
		};

		self.cache.insert(request.clone(), quote.clone(), OffsetDateTime::now_utc());

		Ok(quote)
	}
}

fn quote_id(raw: &Value) -> Option<String> {
	["_id", "id", "quoteId"].iter().find_map(|key| raw.get(*key)?.as_str().map(ToOwned::to_owned))
}
