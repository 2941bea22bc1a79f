use std::net::SocketAddr;

use crate::server::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total protocol requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotbook_requests_total";

/// Histogram: protocol request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotbook_request_duration_seconds";

/// Counter: booking attempts. Labels: status (ok or the error code).
pub const BOOKINGS_TOTAL: &str = "slotbook_bookings_total";

/// Histogram: end-to-end booking transaction latency in seconds.
pub const BOOKING_DURATION_SECONDS: &str = "slotbook_booking_duration_seconds";

/// Counter: appointments canceled. Labels: by.
pub const CANCELLATIONS_TOTAL: &str = "slotbook_cancellations_total";

/// Counter: appointments removed.
pub const DELETIONS_TOTAL: &str = "slotbook_deletions_total";

/// Counter: notifications a sink failed to deliver.
pub const NOTIFICATION_FAILURES_TOTAL: &str = "slotbook_notification_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Counter: failed admin `auth` attempts.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Ping => "ping",
        Request::Auth { .. } => "auth",
        Request::Available { .. } => "available",
        Request::Book(_) => "book",
        Request::GetBooking { .. } => "get_booking",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::CreateSlot { .. } => "create_slot",
        Request::SetSlotActive { .. } => "set_slot_active",
        Request::RenameSlot { .. } => "rename_slot",
        Request::DeleteSlot { .. } => "delete_slot",
        Request::ListSlots => "list_slots",
        Request::ListAppointments { .. } => "list_appointments",
        Request::Availability { .. } => "availability",
        Request::SlotPreview { .. } => "slot_preview",
        Request::CreateLink { .. } => "create_link",
        Request::DeleteLink { .. } => "delete_link",
        Request::ListLinks => "list_links",
        Request::CancelAppointment { .. } => "cancel_appointment",
        Request::DeleteAppointment { .. } => "delete_appointment",
    }
}
