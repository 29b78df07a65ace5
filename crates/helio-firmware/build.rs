//! Reads `.env` (if present) and forwards the station settings to the
//! compiler as `HELIO_*` environment variables for `option_env!`.

const FORWARDED: &[&str] = &[
    "HELIO_WIFI_SSID",
    "HELIO_WIFI_PASSWORD",
    "HELIO_TELEMETRY_HOST",
    "HELIO_TELEMETRY_PORT",
    "HELIO_COMMAND_PORT",
    "HELIO_NTP_SERVER",
    "HELIO_UTC_OFFSET_MINUTES",
    "HELIO_SLEEP_START_HOUR",
    "HELIO_WAKE_HOUR",
    "HELIO_BATTERY_CAPACITY_AH",
    "HELIO_INVERT_CURRENT",
    "HELIO_TRACKER_TOLERANCE",
];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    match dotenvy::dotenv() {
        Ok(path) => println!("cargo:warning=loaded settings from {}", path.display()),
        Err(e) if e.not_found() => {
            println!("cargo:warning=no .env file; WiFi credentials will be empty")
        }
        Err(e) => panic!("failed to read .env: {e}"),
    }

    for key in FORWARDED {
        println!("cargo:rerun-if-env-changed={key}");
        if let Ok(value) = std::env::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
