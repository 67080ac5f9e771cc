use crate::page::Page;
use std::time::Duration;
use tarang_core::{RunState, Severity};
use tokio::time::Instant;

pub const NOTIFICATION_TTL: Duration = Duration::from_secs(5);

pub fn update_connection_status(page: &mut Page, connected: bool) {
    if let Some(element) = page.connection_status.as_mut() {
        element.class = if connected { "text-success" } else { "text-danger" }.to_string();
        element.text = if connected { "Connected" } else { "Disconnected" }.to_string();
    }
}

pub fn update_status(page: &mut Page, status: RunState, message: &str) {
    if let Some(element) = page.status.as_mut() {
        element.class = format!("status-{}", status.as_str());
        element.text = message.to_string();
    }
}

pub fn clear_output(page: &mut Page) {
    if let Some(output) = page.output.as_mut() {
        output.clear();
    }
}

/// Start enabled, stop disabled.
pub fn enable_start_button(page: &mut Page) {
    if let Some(start) = page.start_btn.as_mut() {
        start.disabled = false;
    }
    if let Some(stop) = page.stop_btn.as_mut() {
        stop.disabled = true;
    }
}

/// Start disabled, stop enabled.
pub fn disable_start_button(page: &mut Page) {
    if let Some(start) = page.start_btn.as_mut() {
        start.disabled = true;
    }
    if let Some(stop) = page.stop_btn.as_mut() {
        stop.disabled = false;
    }
}

pub fn show_notification(
    page: &mut Page,
    message: impl Into<String>,
    severity: Severity,
    now: Instant,
    ttl: Duration,
) -> u64 {
    page.attach_notification(message.into(), severity, now + ttl)
}

/// Drops notifications whose time is up. Ones already dismissed by hand
/// are simply no longer attached and are not touched.
pub fn expire_notifications(page: &mut Page, now: Instant) -> usize {
    page.retain_notifications(|notification| notification.expires_at > now)
}

pub fn dismiss_latest_notification(page: &mut Page) -> bool {
    let Some(id) = page.notifications().last().map(|n| n.id) else {
        return false;
    };
    page.remove_notification(id)
}

pub fn next_notification_expiry(page: &Page) -> Option<Instant> {
    page.notifications().iter().map(|n| n.expires_at).min()
}

pub fn update_progress(page: &mut Page, percentage: f64) {
    let Some(bar) = page.progress_bar.as_mut() else {
        return;
    };
    let clamped = if percentage.is_finite() {
        percentage.clamp(0.0, 100.0)
    } else {
        0.0
    };
    bar.width_percent = clamped;
    bar.aria_valuenow = clamped;
    bar.text = format!("{}%", clamped.round() as u32);
}
