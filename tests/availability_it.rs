// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use rental_broker::{
	_preludet::*,
	services::{AvailabilityQuery, StrategyName},
};

async fn mock_token(server: &MockServer) {
	server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token").form_urlencoded_tuple("scope", "open-api");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"calendar-token\",\"token_type\":\"bearer\",\"expires_in\":3600}",
			);
		})
		.await;
}

fn four_open_days(id: &str) -> Value {
	json!({
		"results": [{
			"_id": id,
			"title": "Ocean Loft",
			"calendar": [
				{"date": "2025-06-01", "isAvailable": true, "price": 180},
				{"date": "2025-06-02", "isAvailable": true, "price": 180},
				{"date": "2025-06-03", "isAvailable": true, "price": 195},
				{"date": "2025-06-04", "isAvailable": true, "price": 195}
			]
		}]
	})
}

#[tokio::test]
async fn open_calendar_resolves_to_available() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let by_id = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/v1/listings")
				.header("authorization", "Bearer calendar-token")
				.query_param("ids", "unit-1")
				.query_param("city", "Miami")
				.query_param(
					"available",
					"{\"checkIn\":\"2025-06-01\",\"checkOut\":\"2025-06-05\",\"minOccupancy\":2}",
				);
			then.status(200).json_body(four_open_days("unit-1"));
		})
		.await;
	let query = AvailabilityQuery::new("unit-1", "2025-06-01", "2025-06-05", 2).with_city("Miami");
	let result = client.get_availability(&query).await.expect("Availability should resolve.");

	assert_eq!(result.is_available, Some(true));
	assert_eq!(result.availability.len(), 4);
	assert!(result.errors.is_empty());
	assert_eq!(result.strategy, Some(StrategyName::ById));
	assert!(result.raw_upstream_response.is_some());

	let again = client.get_availability(&query).await.expect("Cached availability expected.");

	assert!(again.cached);
	assert_eq!(again.availability, result.availability);

	by_id.assert_calls_async(1).await;
}

#[tokio::test]
async fn strategies_fall_back_in_order() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let by_id = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings").query_param("ids", "unit-1");
			then.status(200).json_body(json!({"results": []}));
		})
		.await;
	let by_city = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/v1/listings")
				.query_param("city", "Miami")
				.query_param_missing("ids");
			then.status(200).json_body(json!({
				"results": [
					{"_id": "someone-else", "status": "AVAILABLE"},
					{"_id": "unit-1-v2", "alternateId": "legacy-7", "status": "BOOKED"}
				]
			}));
		})
		.await;
	let by_alternate = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings").query_param("ids", "legacy-7");
			then.status(200).json_body(four_open_days("legacy-7"));
		})
		.await;
	let query = AvailabilityQuery::new("unit-1", "2025-06-01", "2025-06-05", 2)
		.with_city("Miami")
		.with_alternate_id("legacy-7");
	let result = client.get_availability(&query).await.expect("Availability should resolve.");

	assert_eq!(result.strategy, Some(StrategyName::ByCity));
	assert_eq!(result.is_available, Some(false));
	assert_eq!(result.errors, ["by_id: no matching record"]);

	by_id.assert_calls_async(1).await;
	by_city.assert_calls_async(1).await;
	by_alternate.assert_calls_async(0).await;
}

#[tokio::test]
async fn exhausted_strategies_report_unknown() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let listings = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings");
			then.status(503).body("maintenance");
		})
		.await;
	let query = AvailabilityQuery::new("unit-1", "2025-06-01", "2025-06-05", 2)
		.with_city("Miami")
		.with_alternate_id("legacy-7");
	let result = client.get_availability(&query).await.expect("Failures are reported inline.");

	assert_eq!(result.is_available, None);
	assert!(result.availability.is_empty());
	assert_eq!(result.errors.len(), 3);
	assert!(result.errors[2].starts_with("by_alternate_id:"));

	listings.assert_calls_async(3).await;

	let retried = client.get_availability(&query).await.expect("Failures are not cached.");

	assert!(!retried.cached);

	listings.assert_calls_async(6).await;
}

#[tokio::test]
async fn rate_limits_stop_the_chain() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let listings = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings");
			then.status(429);
		})
		.await;
	let query = AvailabilityQuery::new("unit-1", "2025-06-01", "2025-06-05", 2).with_city("Miami");
	let result = client.get_availability(&query).await.expect("Rate limits are reported inline.");

	assert_eq!(result.is_available, None);
	assert_eq!(result.errors.len(), 1);
	assert!(result.errors[0].starts_with("by_id:"));

	listings.assert_calls_async(5).await;
}

#[tokio::test]
async fn token_failures_propagate() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token");
			then.status(400)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_client\"}");
		})
		.await;

	let query = AvailabilityQuery::new("unit-1", "2025-06-01", "2025-06-05", 2);
	let err = client.get_availability(&query).await.expect_err("Token failures propagate.");

	assert!(err.is_auth());
	assert_eq!(err.http_status(), 502);
}

#[tokio::test]
async fn null_gallery_does_not_hide_the_record() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let by_id = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings").query_param("ids", "unit-1");
			then.status(200).json_body(json!({
				"results": [{
					"_id": "unit-1",
					"id": "unit-1",
					"pictures": null,
					"days": [
						{"date": "2025-06-01", "isAvailable": true},
						{"date": "2025-06-02", "isAvailable": true}
					]
				}]
			}));
		})
		.await;
	let query = AvailabilityQuery::new("unit-1", "2025-06-01", "2025-06-03", 1);
	let result = client.get_availability(&query).await.expect("Availability should resolve.");

	assert_eq!(result.is_available, Some(true));
	assert_eq!(result.availability.len(), 2);
	assert!(result.errors.is_empty());
	assert_eq!(result.strategy, Some(StrategyName::ById));

	by_id.assert_calls_async(1).await;
}
