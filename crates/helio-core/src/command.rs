//! Remote text commands
//!
//! Commands arrive as short text lines (`/status`, `/park`, ...). Parsing and
//! reply formatting live here; the firmware performs the resulting action.

use core::fmt::Write;

use thiserror_no_std::Error;

use crate::app_state::AppStatus;
use crate::bus::Snapshot;

pub type Reply = heapless::String<192>;

pub const HELP_TEXT: &str = "Available commands:\n\
/status - battery and panel voltage\n\
/park - park the servos\n\
/resume - resume tracking after /park\n\
/sleep [secs] - force deep sleep\n\
/reset - restart the station";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command")]
    Unknown,
    #[error("invalid argument for {0}")]
    InvalidArgument(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Park,
    Resume,
    Sleep { secs: Option<u32> },
    Reset,
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let mut words = text.split_whitespace();
        let name = words.next().ok_or(CommandError::Unknown)?;
        // Chat clients may append "@station" to the command name.
        let name = name.split('@').next().unwrap_or(name);

        let command = match name {
            "/start" | "/help" => Self::Help,
            "/status" => Self::Status,
            "/park" => Self::Park,
            "/resume" => Self::Resume,
            "/sleep" => {
                let secs = match words.next() {
                    Some(arg) => Some(
                        arg.parse::<u32>()
                            .ok()
                            .filter(|&s| s > 0)
                            .ok_or(CommandError::InvalidArgument("/sleep"))?,
                    ),
                    None => None,
                };
                Self::Sleep { secs }
            }
            "/reset" => Self::Reset,
            _ => return Err(CommandError::Unknown),
        };
        Ok(command)
    }
}

/// Side effect the firmware performs after sending the first reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    None,
    Park,
    Resume,
    Sleep { secs: Option<u32> },
    Reset,
}

impl CommandAction {
    /// Follow-up message once the action completed, if any.
    pub const fn completion_text(self) -> Option<&'static str> {
        match self {
            Self::Park => Some("Servos parked."),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub reply: Reply,
    pub action: CommandAction,
}

impl Response {
    fn text(text: &str, action: CommandAction) -> Self {
        Self {
            reply: crate::app_state::truncated(text),
            action,
        }
    }
}

/// Status line from the latest snapshot, or a notice when the bus was busy.
/// The last recorded failure, if any, goes on a final line.
pub fn status_reply(snapshot: Option<&Snapshot>, status: &AppStatus) -> Reply {
    let mut reply = Reply::new();
    let run_state = status.run_state.label();
    let mut written = match snapshot {
        Some(snap) => write!(
            reply,
            "Status ({}):\nBattery: {:.2} V ({:.1}%)\nPanel: {:.2} V\nServos: H {:.0} V {:.0}",
            run_state,
            snap.battery.bus_voltage_v,
            snap.battery_state.soc_percent,
            snap.panel.bus_voltage_v,
            snap.tracker.angle_h,
            snap.tracker.angle_v,
        ),
        None => write!(reply, "Status ({}): sensor data busy, try again", run_state),
    };
    if let Some(error) = &status.last_error {
        written = written.and_then(|()| write!(reply, "\nLast error: {}", error));
    }
    if written.is_err() {
        // Capacity exceeded; whatever fit is still useful.
        log::debug!("Status reply truncated");
    }
    reply
}

/// Reply text and follow-up action for a raw command line.
pub fn respond(text: &str, snapshot: Option<&Snapshot>, status: &AppStatus) -> Response {
    match Command::parse(text) {
        Ok(Command::Help) => Response::text(HELP_TEXT, CommandAction::None),
        Ok(Command::Status) => Response {
            reply: status_reply(snapshot, status),
            action: CommandAction::None,
        },
        Ok(Command::Park) => Response::text("Parking servos...", CommandAction::Park),
        Ok(Command::Resume) => Response::text("Tracking resumed.", CommandAction::Resume),
        Ok(Command::Sleep { secs }) => {
            Response::text("Entering forced deep sleep...", CommandAction::Sleep { secs })
        }
        Ok(Command::Reset) => Response::text("Restarting...", CommandAction::Reset),
        Err(CommandError::InvalidArgument(name)) => {
            let mut reply = Reply::new();
            let _ = write!(reply, "Invalid argument for {name}.");
            Response {
                reply,
                action: CommandAction::None,
            }
        }
        Err(CommandError::Unknown) => Response::text("Unknown command.", CommandAction::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::{AppError, AppRunState};
    use crate::battery::BatteryState;
    use crate::ntp::NtpError;
    use crate::sensors::ElectricalSample;
    use crate::tracker::TrackerState;

    fn tracking() -> AppStatus {
        AppStatus {
            run_state: AppRunState::Tracking,
            ..AppStatus::new()
        }
    }

    #[test]
    fn parses_known_commands() {
        assert_eq!(Command::parse("/help"), Ok(Command::Help));
        assert_eq!(Command::parse("/start"), Ok(Command::Help));
        assert_eq!(Command::parse("  /status \n"), Ok(Command::Status));
        assert_eq!(Command::parse("/park@station"), Ok(Command::Park));
        assert_eq!(Command::parse("/resume"), Ok(Command::Resume));
        assert_eq!(Command::parse("/sleep"), Ok(Command::Sleep { secs: None }));
        assert_eq!(
            Command::parse("/sleep 900"),
            Ok(Command::Sleep { secs: Some(900) })
        );
        assert_eq!(Command::parse("/reset"), Ok(Command::Reset));
    }

    #[test]
    fn rejects_unknown_and_bad_arguments() {
        assert_eq!(Command::parse(""), Err(CommandError::Unknown));
        assert_eq!(Command::parse("hello"), Err(CommandError::Unknown));
        assert_eq!(Command::parse("/statusx"), Err(CommandError::Unknown));
        assert_eq!(
            Command::parse("/sleep soon"),
            Err(CommandError::InvalidArgument("/sleep"))
        );
        assert_eq!(
            Command::parse("/sleep 0"),
            Err(CommandError::InvalidArgument("/sleep"))
        );
    }

    #[test]
    fn status_reports_battery_and_panel() {
        let mut snap = Snapshot::new(TrackerState::new(90.0, 45.0));
        snap.battery = ElectricalSample {
            bus_voltage_v: 3.912,
            ..Default::default()
        };
        snap.panel = ElectricalSample {
            bus_voltage_v: 17.5,
            ..Default::default()
        };
        snap.battery_state = BatteryState { soc_percent: 71.3 };

        let response = respond("/status", Some(&snap), &tracking());
        assert_eq!(response.action, CommandAction::None);
        assert_eq!(
            response.reply.as_str(),
            "Status (tracking):\nBattery: 3.91 V (71.3%)\nPanel: 17.50 V\nServos: H 90 V 45"
        );
    }

    #[test]
    fn status_without_snapshot_says_busy() {
        let response = respond("/status", None, &tracking());
        assert!(response.reply.contains("busy"));
    }

    #[test]
    fn status_reports_last_error() {
        let mut status = tracking();
        status.last_error = Some(AppError::TimeSync(NtpError::Timeout));

        let response = respond("/status", None, &status);
        assert_eq!(
            response.reply.as_str(),
            "Status (tracking): sensor data busy, try again\nLast error: Time sync failed: no reply within timeout"
        );
    }

    #[test]
    fn actions_follow_commands() {
        let state = &tracking();
        assert_eq!(respond("/park", None, state).action, CommandAction::Park);
        assert_eq!(
            CommandAction::Park.completion_text(),
            Some("Servos parked.")
        );
        assert_eq!(
            respond("/sleep 60", None, state).action,
            CommandAction::Sleep { secs: Some(60) }
        );
        assert_eq!(respond("/reset", None, state).action, CommandAction::Reset);

        let unknown = respond("/dance", None, state);
        assert_eq!(unknown.reply.as_str(), "Unknown command.");
        assert_eq!(unknown.action, CommandAction::None);
    }

    #[test]
    fn help_fits_in_a_reply() {
        let response = respond("/help", None, &AppStatus::new());
        assert_eq!(response.reply.as_str(), HELP_TEXT);
    }
}
