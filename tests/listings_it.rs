// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use rental_broker::{_preludet::*, services::ListingQuery};

fn records(range: std::ops::Range<usize>) -> Vec<Value> {
	range
		.map(|n| {
			json!({
				"_id": format!("listing-{n}"),
				"title": format!("Listing {n}"),
				"address": {"full": format!("{n} Ocean Dr"), "city": "Miami"},
				"prices": {"basePrice": 100 + n, "currency": "USD"}
			})
		})
		.collect()
}

async fn mock_token(server: &MockServer) {
	server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"listings-token\",\"token_type\":\"bearer\",\"expires_in\":3600}",
			);
		})
		.await;
}

#[tokio::test]
async fn pagination_walks_every_cursor() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let first = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/v1/listings")
				.header("authorization", "Bearer listings-token")
				.query_param("limit", "100")
				.query_param_missing("cursor");
			then.status(200).json_body(json!({
				"results": records(0..50),
				"pagination": {"cursor": {"next": "page-2"}}
			}));
		})
		.await;
	let second = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings").query_param("cursor", "page-2");
			then.status(200).json_body(json!({
				"results": records(50..100),
				"pagination": {"cursor": {"next": "page-3"}}
			}));
		})
		.await;
	let third = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings").query_param("cursor", "page-3");
			then.status(200).json_body(json!({
				"results": records(100..110),
				"pagination": {"cursor": {"next": null}}
			}));
		})
		.await;
	let response = client
		.list_listings(&ListingQuery::default())
		.await
		.expect("A three-page walk should succeed.");

	assert_eq!(response.results.len(), 110);
	assert!(!response.cached);
	assert_eq!(response.results[0].id, "listing-0");
	assert_eq!(response.results[109].id, "listing-109");
	assert_eq!(response.results[5].city.as_deref(), Some("Miami"));

	first.assert_calls_async(1).await;
	second.assert_calls_async(1).await;
	third.assert_calls_async(1).await;
}

#[tokio::test]
async fn duplicates_keep_the_first_occurrence() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings").query_param_missing("cursor");
			then.status(200).json_body(json!({
				"results": [
					{"_id": "a", "title": "First A"},
					{"_id": "b", "title": "B"}
				],
				"pagination": {"cursor": {"next": "more"}}
			}));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings").query_param("cursor", "more");
			then.status(200).json_body(json!({
				"count": 2,
				"results": [{"_id": "a", "title": "Second A"}, {"_id": "c", "title": "C"}]
			}));
		})
		.await;

	let response =
		client.list_listings(&ListingQuery::default()).await.expect("Walk should succeed.");
	let titles = response.results.iter().map(|l| l.title.as_str()).collect::<Vec<_>>();

	assert_eq!(titles, ["First A", "B", "C"]);
}

#[tokio::test]
async fn identical_queries_hit_the_cache() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let page = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/v1/listings")
				.query_param("city", "Miami")
				.query_param(
					"available",
					"{\"checkIn\":\"2025-06-01\",\"checkOut\":\"2025-06-05\",\"minOccupancy\":2}",
				);
			then.status(200).json_body(json!({"count": 3, "results": records(0..3)}));
		})
		.await;
	let query =
		ListingQuery::default().city("Miami").available_between("2025-06-01", "2025-06-05", 2);
	let first = client.list_listings(&query).await.expect("First fetch should succeed.");
	let second = client.list_listings(&query).await.expect("Second fetch should be cached.");

	assert_eq!(first.results, second.results);
	assert!(!first.cached);
	assert!(second.cached);

	page.assert_calls_async(1).await;

	client.clear_listings_cache();
	client.list_listings(&query).await.expect("Refetch after clearing should succeed.");

	page.assert_calls_async(2).await;
}

#[tokio::test]
async fn runaway_pagination_stops_at_the_guard() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let endless = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings");
			then.status(200).json_body(json!({
				"results": records(0..1),
				"pagination": {"cursor": {"next": "again"}}
			}));
		})
		.await;
	let response =
		client.list_listings(&ListingQuery::default()).await.expect("Guarded walk should end.");

	assert_eq!(response.results.len(), 1);

	endless.assert_calls_async(25).await;
}

#[tokio::test]
async fn mid_walk_failures_fail_the_whole_fetch() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let first = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings").query_param_missing("cursor");
			then.status(200).json_body(json!({
				"results": records(0..50),
				"pagination": {"cursor": {"next": "page-2"}}
			}));
		})
		.await;
	let broken = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings").query_param("cursor", "page-2");
			then.status(500).body("upstream exploded");
		})
		.await;
	let err = client
		.list_listings(&ListingQuery::default())
		.await
		.expect_err("A failed page must fail the walk.");

	assert!(matches!(err, Error::Upstream { status: 500, ref body } if body == "upstream exploded"));
	assert_eq!(err.http_status(), 502);

	broken.assert_calls_async(1).await;

	client.list_listings(&ListingQuery::default()).await.expect_err("Nothing partial is cached.");

	first.assert_calls_async(2).await;
}

#[tokio::test]
async fn rejected_tokens_are_refreshed_once() {
	let server = MockServer::start_async().await;
	let (client, cache) = build_test_client(test_config(&server.base_url()));
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"revoked-token\",\"token_type\":\"bearer\",\"expires_in\":3600}",
			);
		})
		.await;
	let listings = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings");
			then.status(401).body("token revoked");
		})
		.await;
	let err = client
		.list_listings(&ListingQuery::default())
		.await
		.expect_err("A token the upstream keeps rejecting should fail.");

	assert!(matches!(err, Error::Upstream { status: 401, .. }));

	token.assert_calls_async(2).await;
	listings.assert_calls_async(2).await;

	assert_eq!(cache.writes(), 2);
}

#[tokio::test]
async fn invalid_filters_never_reach_the_upstream() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token");
			then.status(500);
		})
		.await;
	let listings = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings");
			then.status(500);
		})
		.await;
	let query = ListingQuery::default().available_between("2025-06-05", "2025-06-01", 2);
	let err = client.list_listings(&query).await.expect_err("Reversed dates are invalid.");

	assert_eq!(err.http_status(), 400);

	token.assert_calls_async(0).await;
	listings.assert_calls_async(0).await;
}

#[tokio::test]
async fn odd_records_do_not_fail_the_walk() {
	let server = MockServer::start_async().await;
	let (client, _cache) = build_test_client(test_config(&server.base_url()));

	mock_token(&server).await;

	let page = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/listings");
			then.status(200).json_body(json!({
				"results": [
					{"_id": "both-ids", "id": "both-ids", "title": "Twin"},
					{"_id": "null-gallery", "title": "Bare", "pictures": null},
					{"_id": "bad-bedrooms", "bedrooms": "three"},
					{"_id": "last", "title": "Last"}
				]
			}));
		})
		.await;
	let response = client
		.list_listings(&ListingQuery::default())
		.await
		.expect("A page with odd records should still be served.");
	let ids = response.results.iter().map(|listing| listing.id.as_str()).collect::<Vec<_>>();

	assert_eq!(ids, ["both-ids", "null-gallery", "last"]);
	assert!(response.results[1].photo_gallery.is_empty());

	page.assert_calls_async(1).await;
}
