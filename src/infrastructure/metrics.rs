//! Prometheus metrics
//!
//! Recording helpers are no-ops until a recorder is installed.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus exporter with an HTTP scrape endpoint on `listen`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()?;

    describe_counter!(
        "sip_packets_received_total",
        "Datagrams read from the SIP socket"
    );
    describe_counter!(
        "sip_packets_dropped_total",
        "Datagrams dropped before reaching a connection handler"
    );
    describe_gauge!(
        "sip_active_connections",
        "Number of live per-peer virtual connections"
    );
    describe_counter!(
        "sip_connections_evicted_total",
        "Virtual connections torn down for idleness"
    );
    describe_counter!(
        "sip_challenges_issued_total",
        "Digest challenges sent to peers"
    );
    describe_gauge!(
        "sip_pending_challenges",
        "Challenge sessions awaiting verification"
    );
    describe_counter!("sip_registrations_total", "REGISTER requests by outcome");
    describe_gauge!(
        "sip_registered_users",
        "Number of currently registered SIP users"
    );

    Ok(())
}

pub fn record_packet_received() {
    counter!("sip_packets_received_total").increment(1);
}

pub fn record_packet_dropped(reason: &'static str) {
    counter!("sip_packets_dropped_total", "reason" => reason).increment(1);
}

pub fn update_active_connections(count: usize) {
    gauge!("sip_active_connections").set(count as f64);
}

pub fn record_connections_evicted(count: usize) {
    counter!("sip_connections_evicted_total").increment(count as u64);
}

pub fn record_challenge_issued() {
    counter!("sip_challenges_issued_total").increment(1);
}

pub fn update_pending_challenges(count: usize) {
    gauge!("sip_pending_challenges").set(count as f64);
}

/// `outcome` is one of `registered`, `unregistered`, `challenged`, `rejected`
pub fn record_registration(outcome: &'static str) {
    counter!("sip_registrations_total", "outcome" => outcome).increment(1);
}

pub fn update_registered_users(count: usize) {
    gauge!("sip_registered_users").set(count as f64);
}
