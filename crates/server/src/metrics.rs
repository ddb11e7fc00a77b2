use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use vmctl_common::prelude::{Error, Result};

const NAMESPACE: &str = "vmctl";

/// Prometheus collectors of the service, exposed at `/metrics`.
///
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    request_duration_seconds: HistogramVec,
    deployments_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "HTTP request duration in seconds")
                .namespace(NAMESPACE),
            &["method", "path", "status"],
        )
        .map_err(|err| Error::Any(err.to_string()))?;
        let deployments_total = IntCounterVec::new(
            Opts::new("deployments_total", "Finished deployments by result").namespace(NAMESPACE),
            &["result"],
        )
        .map_err(|err| Error::Any(err.to_string()))?;

        registry
            .register(Box::new(request_duration_seconds.clone()))
            .map_err(|err| Error::Any(err.to_string()))?;
        registry
            .register(Box::new(deployments_total.clone()))
            .map_err(|err| Error::Any(err.to_string()))?;

        Ok(Self {
            registry,
            request_duration_seconds,
            deployments_total,
        })
    }

    /// Records one served request. `path` is the matched route, not the raw
    /// URI, to keep the label set bounded.
    ///
    pub fn observe_request(&self, method: &str, path: &str, status: u16, seconds: f64) {
        self.request_duration_seconds
            .with_label_values(&[method, path, &status.to_string()])
            .observe(seconds);
    }

    /// Counts a deployment that reached `complete` or `error`.
    ///
    pub fn deployment_finished(&self, result: &str) {
        self.deployments_total.with_label_values(&[result]).inc();
    }

    pub fn deployments(&self, result: &str) -> u64 {
        self.deployments_total.with_label_values(&[result]).get()
    }

    /// Text exposition of every collector.
    ///
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|err| Error::Any(err.to_string()))?;

        String::from_utf8(buffer).map_err(|err| Error::Any(err.to_string()))
    }
}
