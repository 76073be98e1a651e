//! Request/response orchestration: throttle, sign, send, classify, retry.

use std::{sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use tokio::time::{sleep, timeout};

use crate::{
    classify::RawFailure,
    context::VenueContext,
    error::{ErrorKind, ErrorRecord, TransportError, TransportResult},
    retry::{RetryConfig, RetryPolicy},
    transport::{NoSigner, Request, RequestSigner, Response, Transport},
};

/// Default per-attempt deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs single request/response exchanges against one venue.
///
/// Each call owns its own retry state, so concurrent calls never wait on
/// each other except through the shared rate limiter.
pub struct RequestExecutor<T> {
    transport: T,
    context: VenueContext,
    policy: RetryPolicy,
    signer: Arc<dyn RequestSigner>,
    default_timeout: Duration,
}

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: T, context: VenueContext, retry: RetryConfig) -> TransportResult<Self> {
        retry.validate().map_err(TransportError::config)?;
        Ok(Self {
            transport,
            context,
            policy: RetryPolicy::new(retry),
            signer: Arc::new(NoSigner),
            default_timeout: DEFAULT_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_signer(mut self, signer: impl RequestSigner + 'static) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn context(&self) -> &VenueContext {
        &self.context
    }

    /// Execute a request, retrying transient failures.
    ///
    /// Non-2xx responses are failures. The error surfaced after the last
    /// attempt is that attempt's record, unchanged.
    pub async fn execute(&self, request: Request) -> TransportResult<Response> {
        let correlation_id = request.id.to_string();
        let limiter = self.context.limiter();
        let weight = request
            .weight
            .unwrap_or_else(|| limiter.weight_for(&request.endpoint));
        let deadline = request.timeout.unwrap_or(self.default_timeout);
        let mut retry = self.policy.context();

        loop {
            if let Err(exceeded) = limiter.acquire_for(&request.endpoint, weight).await {
                return Err(self.record(
                    ErrorKind::ClientRequestInvalid,
                    exceeded.to_string(),
                    &correlation_id,
                ));
            }

            let mut attempt = request.clone();
            if let Err(err) = self.signer.sign(&mut attempt).await {
                return Err(ErrorRecord::new(
                    ErrorKind::AuthInvalid,
                    self.context.venue(),
                    "request signing failed",
                )
                .with_correlation_id(correlation_id.as_str())
                .with_cause(err.to_string())
                .into());
            }

            let failure = match timeout(deadline, self.transport.send(attempt)).await {
                Ok(Ok(response)) if response.is_success() => return Ok(response),
                Ok(Ok(response)) => RawFailure::Status {
                    status: response.status,
                    retry_after: response.retry_after(),
                    body: Some(response.text()),
                },
                Ok(Err(raw)) => raw,
                Err(_) => RawFailure::Timeout,
            };

            let record = self
                .context
                .classifier()
                .classify(&failure)
                .with_correlation_id(correlation_id.as_str());
            retry.record_failure(record.clone());

            let decision = self.policy.should_retry(&retry);
            if !decision.retry {
                tracing::debug!(
                    venue = self.context.venue(),
                    endpoint = %request.endpoint,
                    attempt = retry.attempt,
                    kind = %record.kind(),
                    "Request failed"
                );
                return Err(record.into());
            }

            tracing::info!(
                venue = self.context.venue(),
                endpoint = %request.endpoint,
                attempt = retry.attempt,
                max_attempts = retry.max_attempts,
                delay_ms = decision.delay.as_millis() as u64,
                error = %record,
                "Retrying request"
            );
            sleep(decision.delay).await;
        }
    }

    /// Execute a request and parse its body as JSON.
    ///
    /// A body that does not parse is a `SchemaViolation` and is not retried.
    pub async fn execute_json<R: DeserializeOwned>(&self, request: Request) -> TransportResult<R> {
        let correlation_id = request.id.to_string();
        let response = self.execute(request).await?;
        serde_json::from_slice(&response.body).map_err(|err| {
            self.context
                .classifier()
                .classify(&RawFailure::from(err))
                .with_correlation_id(correlation_id)
                .into()
        })
    }

    fn record(&self, kind: ErrorKind, message: String, correlation_id: &str) -> TransportError {
        ErrorRecord::new(kind, self.context.venue(), message)
            .with_correlation_id(correlation_id)
            .into()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicU32, Ordering},
    };

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;

    use super::*;
    use crate::{
        classify::{ErrorClassifier, PhraseTable},
        rate_limit::RateLimiter,
    };

    type Outcome = Result<(u16, &'static str), RawFailure>;

    /// Replays scripted outcomes and counts attempts.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Outcome>>,
        attempts: AtomicU32,
        delay: Option<Duration>,
        seen: Mutex<Vec<Request>>,
    }

    impl ScriptedTransport {
        fn new(script: impl IntoIterator<Item = Outcome>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Transport for Arc<ScriptedTransport> {
        async fn send(&self, request: Request) -> Result<Response, RawFailure> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(request.clone());
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            let next = self.script.lock().pop_front();
            match next {
                Some(Ok((status, body))) => Ok(Response::new(request.id, status, body)),
                Some(Err(raw)) => Err(raw),
                None => Ok(Response::new(request.id, 200, "{}")),
            }
        }
    }

    fn executor(transport: &Arc<ScriptedTransport>) -> RequestExecutor<Arc<ScriptedTransport>> {
        RequestExecutor::new(
            transport.clone(),
            VenueContext::new("testex"),
            RetryConfig::new()
                .max_attempts(3)
                .initial_delay(Duration::from_millis(10))
                .jitter(0.0),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_venue_unavailable_twice_then_success() {
        let transport = Arc::new(ScriptedTransport::new([
            Ok((503, "Service Unavailable")),
            Ok((502, "Bad Gateway")),
            Ok((200, "pong")),
        ]));
        let response = executor(&transport)
            .execute(Request::get("/ping"))
            .await
            .unwrap();

        assert_eq!(response.body.as_ref(), b"pong");
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new([Ok((400, "bad symbol"))]));
        let request = Request::post("/order");
        let id = request.id.to_string();

        let err = executor(&transport).execute(request).await.unwrap_err();

        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
        let record = err.record().unwrap();
        assert_eq!(record.kind(), ErrorKind::ClientRequestInvalid);
        assert_eq!(record.venue(), "testex");
        assert_eq!(record.code(), Some("400"));
        assert_eq!(record.correlation_id(), Some(id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_venue_rate_limit_code_on_400_is_retried() {
        let transport = Arc::new(ScriptedTransport::new([Ok((
            400,
            r#"{"code":-1015,"msg":"Too many new orders."}"#,
        ))]));
        let table = PhraseTable::new("testex-1").code("-1015", ErrorKind::RateLimited);
        let exec = RequestExecutor::new(
            transport.clone(),
            VenueContext::new("testex")
                .with_classifier(ErrorClassifier::with_table("testex", table)),
            RetryConfig::new()
                .max_attempts(3)
                .initial_delay(Duration::from_millis(10))
                .jitter(0.0),
        )
        .unwrap();

        exec.execute(Request::post("/order")).await.unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_does_not_delay_other_calls() {
        let transport = Arc::new(ScriptedTransport::new([Ok((503, "busy"))]));
        let exec = RequestExecutor::new(
            transport.clone(),
            VenueContext::new("testex"),
            RetryConfig::new()
                .max_attempts(3)
                .initial_delay(Duration::from_secs(10))
                .jitter(0.0),
        )
        .unwrap();
        let start = tokio::time::Instant::now();

        // First attempt fails and the call parks in its backoff sleep.
        let backing_off = exec.execute(Request::get("/slow"));
        tokio::pin!(backing_off);
        assert!(futures::poll!(&mut backing_off).is_pending());
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);

        exec.execute(Request::get("/fast")).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);

        backing_off.await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_record() {
        let transport = Arc::new(ScriptedTransport::new([
            Err(RawFailure::other("connection reset by peer")),
            Err(RawFailure::Timeout),
            Ok((500, "internal server error")),
        ]));

        let err = executor(&transport)
            .execute(Request::get("/time"))
            .await
            .unwrap_err();

        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(err.kind(), ErrorKind::VenueUnavailable);
        assert!(matches!(err, TransportError::Venue(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_deadline_is_timeout() {
        let transport = Arc::new(ScriptedTransport {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let exec = executor(&transport);

        let err = exec
            .execute(Request::get("/slow").timeout(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signer_runs_before_every_attempt() {
        #[derive(Debug, Default)]
        struct CountingSigner(AtomicU32);

        #[async_trait]
        impl RequestSigner for CountingSigner {
            async fn sign(&self, request: &mut Request) -> TransportResult<()> {
                let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
                request.headers.insert("X-Signature".to_string(), n.to_string());
                Ok(())
            }
        }

        let transport = Arc::new(ScriptedTransport::new([Ok((503, "")), Ok((200, "{}"))]));
        executor(&transport)
            .with_signer(CountingSigner::default())
            .execute(Request::get("/account"))
            .await
            .unwrap();

        let seen = transport.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].headers.get("X-Signature").unwrap(), "1");
        assert_eq!(seen[1].headers.get("X-Signature").unwrap(), "2");
    }

    #[tokio::test]
    async fn test_signer_failure_is_auth_invalid() {
        #[derive(Debug)]
        struct BrokenSigner;

        #[async_trait]
        impl RequestSigner for BrokenSigner {
            async fn sign(&self, _request: &mut Request) -> TransportResult<()> {
                Err(TransportError::config("missing secret"))
            }
        }

        let transport = Arc::new(ScriptedTransport::default());
        let err = executor(&transport)
            .with_signer(BrokenSigner)
            .execute(Request::get("/account"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthInvalid);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_json_schema_violation() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct ServerTime {
            server_time: u64,
        }

        let transport = Arc::new(ScriptedTransport::new([Ok((200, r#"{"unexpected":true}"#))]));
        let err = executor(&transport)
            .execute_json::<ServerTime>(Request::get("/time"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);

        let transport = Arc::new(ScriptedTransport::new([Ok((200, r#"{"server_time":42}"#))]));
        let time: ServerTime = executor(&transport)
            .execute_json(Request::get("/time"))
            .await
            .unwrap();
        assert_eq!(time.server_time, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_applies_per_attempt() {
        let limiter = Arc::new(RateLimiter::new());
        limiter.add_limit("ip", 10, 10.0 / 1000.0);

        let transport = Arc::new(ScriptedTransport::default());
        let exec = RequestExecutor::new(
            transport.clone(),
            VenueContext::new("testex").with_limiter(limiter.clone()),
            RetryConfig::no_retry(),
        )
        .unwrap();

        let start = tokio::time::Instant::now();
        exec.execute(Request::get("/heavy").weight(10)).await.unwrap();
        exec.execute(Request::get("/light")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));

        let err = exec
            .execute(Request::get("/huge").weight(11))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientRequestInvalid);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_retry_config_rejected() {
        let result = RequestExecutor::new(
            Arc::new(ScriptedTransport::default()),
            VenueContext::new("testex"),
            RetryConfig::new().max_attempts(0),
        );
        assert!(matches!(result, Err(TransportError::Config { .. })));
    }
}
