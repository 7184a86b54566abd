use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider, UpDownCounter},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    inference_duration: Histogram<u64>,
    inference_failures: Counter<u64>,
    websocket_connections: UpDownCounter<i64>,
    // Instruments only export while their provider is alive; the global
    // slot may be replaced by a later instance.
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("frame_server");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of frame requests")
            .build();

        // Engine startup dominates, so buckets start at 50ms and reach 30s.
        let boundaries = generate_boundaries((50, 250, 1000, 5000, 30000));

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of pipeline invocations in milliseconds")
            .build();

        let inference_failures = meter
            .u64_counter("inference_failures_total")
            .with_description("Pipeline invocations that ended in an error")
            .build();

        let websocket_connections = meter
            .i64_up_down_counter("websocket_connections")
            .with_description("Currently open WebSocket connections")
            .build();

        Ok(Metrics {
            request_counter,
            inference_duration,
            inference_failures,
            websocket_connections,
            _provider: provider,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_inference_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.inference_duration.record(duration_ms, &attributes);
    }

    pub fn record_failure(&self, route: &str, kind: &'static str) {
        let attributes = vec![
            KeyValue::new("route", route.to_string()),
            KeyValue::new("kind", kind),
        ];
        self.inference_failures.add(1, &attributes);
    }

    pub fn connection_opened(&self) {
        self.websocket_connections.add(1, &[]);
    }

    pub fn connection_closed(&self) {
        self.websocket_connections.add(-1, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 50;
    let middle_step: usize = 250;
    let end_step: usize = 1000;
    let tail_step: usize = 5000;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
