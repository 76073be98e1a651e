//! Per-client collaborators shared by the request and streaming halves.

use std::sync::Arc;

use crate::{classify::ErrorClassifier, rate_limit::RateLimiter};

/// Everything a connection or executor needs to know about its venue.
///
/// Created by the owning client and handed to each half at construction;
/// dropping the client drops the context.
#[derive(Clone, Debug)]
pub struct VenueContext {
    venue: Arc<str>,
    classifier: Arc<ErrorClassifier>,
    limiter: Arc<RateLimiter>,
}

impl VenueContext {
    /// Context with the generic classifier and an unlimited rate limiter.
    pub fn new(venue: impl Into<String>) -> Self {
        let venue: String = venue.into();
        Self {
            classifier: Arc::new(ErrorClassifier::new(venue.as_str())),
            limiter: Arc::new(RateLimiter::new()),
            venue: venue.into(),
        }
    }

    /// Replace the classifier. Its venue name becomes the context's venue.
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.venue = classifier.venue().into();
        self.classifier = Arc::new(classifier);
        self
    }

    /// Share an existing rate limiter, e.g. one per IP across clients.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}
