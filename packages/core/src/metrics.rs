//! Prometheus metrics registry for the trial access service.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the resolver, the sweep scheduler and the HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};

/// Outcome label values for `trial_lookups_total`.
pub mod outcome {
    pub const ACTIVE: &str = "active";
    pub const EXPIRED: &str = "expired";
    pub const NONE: &str = "none";
    pub const FAILED: &str = "failed";
}

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Trial status lookups, labelled by outcome. `failed` lookups are
    /// reported to callers as "no trial" but counted separately here.
    pub trial_lookups_total: CounterVec,
    /// Trials moved to `expired` by sweeps.
    pub trials_expired_total: Counter,
    /// Expiry reminders queued.
    pub reminders_queued_total: Counter,
    /// Sweep cycles run (success + failure).
    pub sweeps_total: Counter,
    /// Sweep steps that returned an error.
    pub sweep_errors_total: Counter,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let trial_lookups_total = CounterVec::new(
            Opts::new(
                "trial_access_lookups_total",
                "Trial status lookups by outcome",
            ),
            &["outcome"],
        )?;

        let trials_expired_total = Counter::with_opts(Opts::new(
            "trial_access_trials_expired_total",
            "Trials marked expired by sweeps",
        ))?;

        let reminders_queued_total = Counter::with_opts(Opts::new(
            "trial_access_reminders_queued_total",
            "Expiry reminders queued",
        ))?;

        let sweeps_total = Counter::with_opts(Opts::new(
            "trial_access_sweeps_total",
            "Trial sweep cycles run",
        ))?;

        let sweep_errors_total = Counter::with_opts(Opts::new(
            "trial_access_sweep_errors_total",
            "Failed trial sweep steps",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "trial_access_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "trial_access_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(trial_lookups_total.clone()))?;
        registry.register(Box::new(trials_expired_total.clone()))?;
        registry.register(Box::new(reminders_queued_total.clone()))?;
        registry.register(Box::new(sweeps_total.clone()))?;
        registry.register(Box::new(sweep_errors_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            trial_lookups_total,
            trials_expired_total,
            reminders_queued_total,
            sweeps_total,
            sweep_errors_total,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    pub fn record_lookup(&self, outcome: &str) {
        self.trial_lookups_total.with_label_values(&[outcome]).inc();
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

/// Axum middleware recording request count and latency.
///
/// The `path` label is the matched route template (e.g.
/// `/trial/:user_id/cancel`) so per-user paths do not explode cardinality.
pub async fn track_http(
    State(metrics): State<Arc<AppMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();
    metrics
        .http_request_duration
        .observe(started.elapsed().as_secs_f64());

    response
}


#[cfg(test)]
mod middleware_tests {
    use super::*;

    use axum::{body::Body, http::Request as HttpRequest, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn middleware_labels_requests_with_route_template() {
        let metrics = Arc::new(AppMetrics::new().unwrap());
        let app = Router::new()
            .route("/trial/:user_id/cancel", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(metrics.clone(), track_http));

        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/trial/u1/cancel")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let count = metrics
            .http_requests_total
            .with_label_values(&["GET", "/trial/:user_id/cancel", "200"])
            .get();
        assert!((count - 1.0).abs() < f64::EPSILON);
        assert_eq!(metrics.http_request_duration.get_sample_count(), 1);
    }
}
