//! Frame composition: view + state → lines of text.
//!
//! Lines are kept short (at most 21 characters) so a frame fits a 128 px wide
//! panel with a 6 px font.

use super::DisplayView;
use crate::{DeviceDiagnostics, DeviceState, ErrorKind};
use std::time::Duration;

/// Values the views need that are not part of [`DeviceState`].
#[derive(Clone, Copy, Debug)]
pub struct ViewContext<'a> {
    pub uptime: Duration,
    pub diagnostics: DeviceDiagnostics,
    pub ssid: &'a str,
}

/// One screenful of text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub title: String,
    pub lines: Vec<String>,
    /// Drawn inverted / highlighted
    pub alert: bool,
}

impl Frame {
    /// Error overlay for `kind`, with a short detail line
    pub fn overlay(kind: ErrorKind, detail: &str) -> Frame {
        let hint = match kind {
            ErrorKind::SensorRead => "retrying next sample",
            ErrorKind::Connectivity => "will retry next send",
            ErrorKind::Auth => "check API key",
            ErrorKind::Transport => "will retry next send",
        };
        Frame {
            title: format!("! {}", kind.label()),
            lines: vec![truncate(detail, 21), hint.to_string()],
            alert: true,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Format an uptime as `1d02h03m`, `2h03m04s` or `3m04s`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes, seconds) = (secs / 86_400, secs / 3600 % 24, secs / 60 % 60, secs % 60);
    if days > 0 {
        format!("{days}d{hours:02}h{minutes:02}m")
    } else if hours > 0 {
        format!("{hours}h{minutes:02}m{seconds:02}s")
    } else {
        format!("{minutes}m{seconds:02}s")
    }
}

/// Render `view` for the current state.
pub fn compose(view: DisplayView, state: &DeviceState, context: &ViewContext<'_>) -> Frame {
    let lines = match view {
        DisplayView::VoltageCurrent => match &state.latest {
            Some(sample) => vec![
                format!("V: {:.1} V", sample.voltage),
                format!("I: {:.3} A", sample.current),
            ],
            None => waiting(),
        },
        DisplayView::PowerEnergy => match &state.latest {
            Some(sample) => vec![
                format!("P: {:.1} W", sample.power),
                format!("E: {:.3} kWh", sample.energy),
            ],
            None => waiting(),
        },
        DisplayView::FrequencyPf => match &state.latest {
            Some(sample) => vec![
                format!("F: {:.1} Hz", sample.frequency),
                format!("PF: {:.2}", sample.power_factor),
            ],
            None => waiting(),
        },
        DisplayView::NetworkStatus => network_lines(state, context),
        DisplayView::SystemStatus => {
            let counters = &state.counters;
            vec![
                format!("Sent: {}", counters.data_points_sent()),
                format!("Events: {}", counters.events_detected()),
                format!("Failed: {}", counters.failed_requests()),
                format!("Heap: {} KB", context.diagnostics.heap / 1024),
                format!("Up: {}", format_uptime(context.uptime)),
            ]
        }
    };

    Frame {
        title: view.title().to_string(),
        lines,
        alert: view == DisplayView::NetworkStatus && state.auth_failed,
    }
}

fn waiting() -> Vec<String> {
    vec!["waiting for meter".to_string()]
}

fn network_lines(state: &DeviceState, context: &ViewContext<'_>) -> Vec<String> {
    let connectivity = &state.connectivity;
    let link = if connectivity.is_connected() {
        "WiFi: connected".to_string()
    } else if connectivity.reconnect_attempts() > 0 {
        format!("WiFi: down ({})", connectivity.reconnect_attempts())
    } else {
        "WiFi: down".to_string()
    };

    let http = match (state.auth_failed, state.last_status) {
        (true, _) => "AUTH FAIL".to_string(),
        (false, Some(status)) => format!("HTTP: {status}"),
        (false, None) => "HTTP: --".to_string(),
    };

    vec![
        link,
        truncate(&format!("SSID: {}", context.ssid), 21),
        format!("RSSI: {} dBm", context.diagnostics.rssi),
        http,
    ]
}
