use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomkeep_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomkeep_query_duration_seconds";

// ── Booking flow ────────────────────────────────────────────────

pub const RESERVATIONS_ADMITTED_TOTAL: &str = "roomkeep_reservations_admitted_total";

/// Counter: creations refused with DatesUnavailable.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "roomkeep_reservations_rejected_total";

/// Counter: verified gateway callbacks that changed a reservation. Labels: outcome.
pub const WEBHOOKS_APPLIED_TOTAL: &str = "roomkeep_webhooks_applied_total";

/// Counter: gateway callbacks failing signature verification.
pub const WEBHOOKS_REJECTED_TOTAL: &str = "roomkeep_webhooks_rejected_total";

/// Counter: notices dropped after the last retry. Labels: kind.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "roomkeep_notifications_failed_total";

pub const ROOMS_RECONCILED_TOTAL: &str = "roomkeep_rooms_reconciled_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomkeep_connections_active";

pub const CONNECTIONS_TOTAL: &str = "roomkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomkeep_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomkeep_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomkeep_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertReservation(_) => "insert_reservation",
        Command::InsertGuest { .. } => "insert_guest",
        Command::ChangeStatus { .. } => "change_status",
        Command::RecordPayment { .. } => "record_payment",
        Command::PaymentNotification(_) => "payment_notification",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectRooms => "select_rooms",
        Command::SelectReservations(_) => "select_reservations",
        Command::SelectUnavailableDates { .. } => "select_unavailable_dates",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectRoomStatus { .. } => "select_room_status",
        Command::SelectPaymentCheckout { .. } => "select_payment_checkout",
    }
}
