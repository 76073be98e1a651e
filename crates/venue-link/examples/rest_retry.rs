//! Request Executor Example
//!
//! Throttled, signed, retried REST calls with classified failures.
//!
//! Run with: `cargo run -p venue-link --example rest_retry`

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use venue_link::{
    BucketConfig, ErrorClassifier, ErrorKind, PhraseTable, RateLimitConfig, RateLimiter, Request,
    RequestExecutor, RequestSigner, RetryConfig, TransportResult, VenueContext,
    http::{HttpConfig, ReqwestTransport},
};

/// Adds a fresh timestamp header to every attempt.
#[derive(Debug)]
struct TimestampSigner {
    api_key: String,
}

#[async_trait]
impl RequestSigner for TimestampSigner {
    async fn sign(&self, request: &mut Request) -> TransportResult<()> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        request.headers.insert("X-API-KEY".into(), self.api_key.clone());
        request.headers.insert("X-TIMESTAMP".into(), ts.to_string());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> TransportResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // 1200 weight per minute per IP; placing an order weighs 10.
    let limits = RateLimitConfig::new()
        .bucket(BucketConfig::global("ip", 1200, 1200.0 / 60_000.0))
        .endpoint_weight("/api/v3/order", 10);
    let phrases = PhraseTable::new("example-2024-01")
        .code("-1021", ErrorKind::AuthInvalid)
        .phrase("too many requests", ErrorKind::RateLimited);

    let context = VenueContext::new("example")
        .with_classifier(ErrorClassifier::with_table("example", phrases))
        .with_limiter(RateLimiter::from_config(&limits).map_err(venue_link::TransportError::config)?.into());

    let transport = ReqwestTransport::new(HttpConfig::new("https://httpbin.org"))?;
    let retry = RetryConfig::new()
        .max_attempts(4)
        .initial_delay(Duration::from_millis(200));
    let executor = RequestExecutor::new(transport, context, retry)?.with_signer(TimestampSigner {
        api_key: "demo".to_string(),
    });

    let response = executor
        .execute(Request::get("/get").query("symbol", "BTCUSDT"))
        .await?;
    println!("GET /get -> {}", response.status);

    // 503 is retried, then surfaced as the last attempt's record.
    match executor.execute(Request::get("/status/503")).await {
        Ok(response) => println!("unexpected success: {}", response.status),
        Err(err) => println!("failed as {}: {err}", err.kind()),
    }

    // 400 is the caller's fault and is never retried.
    if let Err(err) = executor.execute(Request::get("/status/400")).await {
        println!("failed as {}: {err}", err.kind());
    }

    Ok(())
}
