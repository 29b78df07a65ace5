//! Build-time station configuration
//!
//! `build.rs` forwards `HELIO_*` values from `.env`; anything unset or
//! unparsable keeps the default from [`Config::default`].

use core::str::FromStr;

use helio_core::config::Config;
use log::warn;

fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<&str>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
    }
}

fn parse_bool_or(key: &str, raw: Option<&str>, default: bool) -> bool {
    match raw.map(str::trim) {
        None => default,
        Some("1" | "true" | "yes") => true,
        Some("0" | "false" | "no") => false,
        Some(other) => {
            warn!("Ignoring invalid {}={:?}", key, other);
            default
        }
    }
}

/// Defaults with the build-time overrides applied.
pub fn station_config() -> Config<'static> {
    let mut config = Config::default();

    let network = &mut config.network;
    network.ssid = option_env!("HELIO_WIFI_SSID").unwrap_or("");
    network.password = option_env!("HELIO_WIFI_PASSWORD").unwrap_or("");
    if let Some(host) = option_env!("HELIO_TELEMETRY_HOST") {
        network.telemetry_host = host;
    }
    if let Some(server) = option_env!("HELIO_NTP_SERVER") {
        network.ntp_server = server;
    }
    network.telemetry_port = parse_or(
        "HELIO_TELEMETRY_PORT",
        option_env!("HELIO_TELEMETRY_PORT"),
        network.telemetry_port,
    );
    network.command_port = parse_or(
        "HELIO_COMMAND_PORT",
        option_env!("HELIO_COMMAND_PORT"),
        network.command_port,
    );

    let sleep = &mut config.sleep;
    sleep.utc_offset_minutes = parse_or(
        "HELIO_UTC_OFFSET_MINUTES",
        option_env!("HELIO_UTC_OFFSET_MINUTES"),
        sleep.utc_offset_minutes,
    );
    sleep.sleep_start_hour = parse_or(
        "HELIO_SLEEP_START_HOUR",
        option_env!("HELIO_SLEEP_START_HOUR"),
        sleep.sleep_start_hour,
    );
    sleep.wake_hour = parse_or(
        "HELIO_WAKE_HOUR",
        option_env!("HELIO_WAKE_HOUR"),
        sleep.wake_hour,
    );

    config.battery.capacity_ah = parse_or(
        "HELIO_BATTERY_CAPACITY_AH",
        option_env!("HELIO_BATTERY_CAPACITY_AH"),
        config.battery.capacity_ah,
    );
    config.battery.invert_current = parse_bool_or(
        "HELIO_INVERT_CURRENT",
        option_env!("HELIO_INVERT_CURRENT"),
        config.battery.invert_current,
    );
    config.tracker.tolerance = parse_or(
        "HELIO_TRACKER_TOLERANCE",
        option_env!("HELIO_TRACKER_TOLERANCE"),
        config.tracker.tolerance,
    );

    config
}
