use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    detection_duration: Histogram<u64>,
    violation_counter: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        // TODO: deprecated crate to be replaced with an OTLP exporter
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("helmet_detection");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let detection_duration = meter
            .u64_histogram("detection_duration_ms")
            .with_boundaries(vec![
                10., 25., 50., 100., 250., 500., 1000., 2500., 5000.,
            ])
            .with_description("Duration of one detect request in milliseconds")
            .build();

        let violation_counter = meter
            .u64_counter("violations_total")
            .with_description("Total number of helmet violations detected")
            .build();

        Metrics {
            request_counter,
            detection_duration,
            violation_counter,
            registry,
        }
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_detection_duration(&self, duration_ms: u64) {
        self.detection_duration.record(duration_ms, &[]);
    }

    pub fn record_violations(&self, count: u64) {
        if count > 0 {
            self.violation_counter.add(count, &[]);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
