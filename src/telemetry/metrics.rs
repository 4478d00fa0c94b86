//! Prometheus metrics

use std::net::SocketAddr;
use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Venue order submission round trip
    OrderSubmission,
    /// Live account state fetch
    StateFetch,
    /// Full reconciliation pass
    Reconcile,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Effective account balance
    Balance,
    /// Positions value plus open-order notional
    TotalExposure,
    /// Open position count
    OpenPositions,
    /// Open order count
    OpenOrders,
    /// Markets with a submission in flight
    InFlight,
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Orders accepted by the venue
    OrdersFilled,
    /// Orders that failed at the venue
    OrdersFailed,
    /// Intents rejected by a safety gate
    OrdersRejected,
    /// Discrepancies surfaced by reconciliation
    Discrepancies,
    /// Cycle iterations that ended in an error
    CycleErrors,
    /// State reads served from a stale cache
    StaleStateServed,
}

fn latency_name(metric: LatencyMetric) -> &'static str {
    match metric {
        LatencyMetric::OrderSubmission => "polyconv_order_submission_latency_ms",
        LatencyMetric::StateFetch => "polyconv_state_fetch_latency_ms",
        LatencyMetric::Reconcile => "polyconv_reconcile_latency_ms",
    }
}

fn gauge_name(metric: GaugeMetric) -> &'static str {
    match metric {
        GaugeMetric::Balance => "polyconv_balance_usd",
        GaugeMetric::TotalExposure => "polyconv_total_exposure_usd",
        GaugeMetric::OpenPositions => "polyconv_open_positions",
        GaugeMetric::OpenOrders => "polyconv_open_orders",
        GaugeMetric::InFlight => "polyconv_in_flight_markets",
    }
}

fn counter_name(metric: CounterMetric) -> &'static str {
    match metric {
        CounterMetric::OrdersFilled => "polyconv_orders_filled_total",
        CounterMetric::OrdersFailed => "polyconv_orders_failed_total",
        CounterMetric::OrdersRejected => "polyconv_orders_rejected_total",
        CounterMetric::Discrepancies => "polyconv_reconcile_discrepancies_total",
        CounterMetric::CycleErrors => "polyconv_cycle_errors_total",
        CounterMetric::StaleStateServed => "polyconv_stale_state_served_total",
    }
}

/// Start the Prometheus scrape endpoint
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    ::metrics::histogram!(latency_name(metric)).record(duration.as_secs_f64() * 1000.0);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    ::metrics::gauge!(gauge_name(metric)).set(value);
}

/// Increment a counter, optionally labelled with a reason
pub fn increment(metric: CounterMetric, reason: Option<&'static str>) {
    match reason {
        Some(reason) => ::metrics::counter!(counter_name(metric), "reason" => reason).increment(1),
        None => ::metrics::counter!(counter_name(metric)).increment(1),
    }
}
