use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oracle::market::{FetchError, FetchMode, MarketDataSource, PriceFetcher, PriceSource};

fn fetcher(url: String) -> PriceFetcher {
    PriceFetcher::new(url, "ethereum", "usd", Duration::from_millis(500)).unwrap()
}

async fn server_returning(template: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(template)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn parses_simple_price_body_and_sends_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(header("user-agent", "PriceOraclePipeline/1.0"))
        .and(header("accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"ethereum":{"usd":1850.0}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let price = fetcher(format!("{}/simple/price", server.uri()))
        .fetch_price()
        .await
        .unwrap();
    assert_eq!(price, 1850.0);
}

#[tokio::test]
async fn non_success_status_is_protocol_error() {
    let server = server_returning(ResponseTemplate::new(429)).await;

    let err = fetcher(format!("{}/simple/price", server.uri()))
        .fetch_price()
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 429, .. }));
    assert_eq!(err.kind(), "protocol");
}

#[tokio::test]
async fn unparseable_body_is_protocol_error() {
    let server = server_returning(ResponseTemplate::new(200).set_body_string("<html>")).await;

    let err = fetcher(format!("{}/simple/price", server.uri()))
        .fetch_price()
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Protocol(_)));
}

#[tokio::test]
async fn zero_price_is_invalid_data() {
    let server =
        server_returning(ResponseTemplate::new(200).set_body_string(r#"{"ethereum":{"usd":0}}"#))
            .await;

    let err = fetcher(format!("{}/simple/price", server.uri()))
        .fetch_price()
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidData(_)));
}

#[tokio::test]
async fn slow_endpoint_times_out_as_network_error() {
    let server = server_returning(
        ResponseTemplate::new(200)
            .set_body_string(r#"{"ethereum":{"usd":1850.0}}"#)
            .set_delay(Duration::from_secs(2)),
    )
    .await;

    let err = fetcher(format!("{}/simple/price", server.uri()))
        .fetch_price()
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
}

#[tokio::test]
async fn aggregated_mode_averages_successes() {
    let a = server_returning(
        ResponseTemplate::new(200).set_body_string(r#"{"ethereum":{"usd":1800.0}}"#),
    )
    .await;
    let b = server_returning(
        ResponseTemplate::new(200).set_body_string(r#"{"ethereum":{"usd":1900.0}}"#),
    )
    .await;
    let broken = server_returning(ResponseTemplate::new(503)).await;

    let urls = vec![
        format!("{}/simple/price", a.uri()),
        format!("{}/simple/price", b.uri()),
        format!("{}/simple/price", broken.uri()),
    ];
    let source = MarketDataSource::new(
        fetcher(urls[0].clone()),
        FetchMode::Aggregated(urls),
        "aggregate",
    );

    assert_eq!(source.fetch().await.unwrap(), 1850.0);
    assert_eq!(source.name(), "aggregate");
}

#[tokio::test]
async fn aggregated_mode_fails_only_when_all_fail() {
    let x = server_returning(ResponseTemplate::new(500)).await;
    let y = server_returning(ResponseTemplate::new(200).set_body_string("{}")).await;

    let urls = vec![
        format!("{}/simple/price", x.uri()),
        format!("{}/simple/price", y.uri()),
    ];

    match fetcher(urls[0].clone()).fetch_aggregated(&urls).await {
        Err(FetchError::AllSourcesFailed(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected AllSourcesFailed, got {other:?}"),
    }

    assert!(matches!(
        fetcher(urls[0].clone()).fetch_aggregated(&[]).await,
        Err(FetchError::AllSourcesFailed(errors)) if errors.is_empty()
    ));
}
