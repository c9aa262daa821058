//! Signaling and negotiation metrics
//!
//! Only records through the `metrics` facade; installing a recorder or
//! exporter is up to the host application.

use metrics::{counter, describe_counter};

/// Register descriptions for every metric this crate emits
pub fn describe_metrics() {
    describe_counter!(
        "meshmeet_envelopes_received_total",
        "Signaling envelopes accepted from the relay"
    );
    describe_counter!(
        "meshmeet_envelopes_dropped_total",
        "Signaling envelopes dropped as malformed or out of context"
    );
    describe_counter!(
        "meshmeet_envelopes_sent_total",
        "Signaling envelopes handed to the relay"
    );
    describe_counter!(
        "meshmeet_peer_connections_opened_total",
        "Peer connections created"
    );
    describe_counter!(
        "meshmeet_negotiation_failures_total",
        "Offer/answer or track operations that failed for one peer"
    );
}

pub fn record_envelope_received(kind: &str) {
    counter!("meshmeet_envelopes_received_total", "type" => kind.to_string()).increment(1);
}

pub fn record_envelope_dropped(reason: &str) {
    counter!("meshmeet_envelopes_dropped_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_envelope_sent(kind: &str) {
    counter!("meshmeet_envelopes_sent_total", "type" => kind.to_string()).increment(1);
}

pub fn record_peer_connection_opened() {
    counter!("meshmeet_peer_connections_opened_total").increment(1);
}

pub fn record_negotiation_failure() {
    counter!("meshmeet_negotiation_failures_total").increment(1);
}
