//! Minimal SNTPv4 client codec
//!
//! Only the pieces needed to learn the current unix time from one server
//! reply: build a client request, validate the reply header and convert the
//! transmit timestamp.

use thiserror_no_std::Error;

pub const NTP_PORT: u16 = 123;
pub const NTP_PACKET_LEN: usize = 48;

/// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01.
const NTP_TO_UNIX_SECS: i64 = 2_208_988_800;
/// Length of one NTP era in seconds.
const NTP_ERA_SECS: i64 = 1 << 32;
/// Era-0 timestamps below this belong to era 1 (after 2036-02-07).
const ERA_PIVOT: u32 = 0x8000_0000;

const VERSION: u8 = 4;
const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;
const LEAP_ALARM: u8 = 3;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtpError {
    #[error("reply too short: {0} bytes")]
    TooShort(usize),
    #[error("unexpected NTP mode {0}")]
    UnexpectedMode(u8),
    #[error("server sent kiss-o'-death")]
    KissOfDeath,
    #[error("server clock not synchronized")]
    ServerUnsynchronized,
    #[error("reply carries no transmit timestamp")]
    MissingTimestamp,
    #[error("network error: {0}")]
    Network(&'static str),
    #[error("no reply within timeout")]
    Timeout,
}

/// A point in time as carried by NTP, converted to the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTimestamp {
    pub unix_secs: i64,
    /// Fraction of a second in units of 2^-32 s.
    pub fraction: u32,
}

impl NtpTimestamp {
    pub fn micros(&self) -> u32 {
        ((u64::from(self.fraction) * 1_000_000) >> 32) as u32
    }

    /// Unix seconds rounded to the nearest second.
    pub fn rounded_unix_secs(&self) -> i64 {
        if self.fraction >= ERA_PIVOT {
            self.unix_secs + 1
        } else {
            self.unix_secs
        }
    }
}

fn ntp_to_unix(seconds: u32) -> i64 {
    let seconds = i64::from(seconds);
    if seconds >= i64::from(ERA_PIVOT) {
        seconds - NTP_TO_UNIX_SECS
    } else {
        seconds + NTP_ERA_SECS - NTP_TO_UNIX_SECS
    }
}

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Client request with everything zero apart from the header byte.
pub fn build_request() -> [u8; NTP_PACKET_LEN] {
    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = (VERSION << 3) | MODE_CLIENT;
    packet
}

/// Validate a server reply and extract its transmit timestamp.
pub fn parse_response(reply: &[u8]) -> Result<NtpTimestamp, NtpError> {
    if reply.len() < NTP_PACKET_LEN {
        return Err(NtpError::TooShort(reply.len()));
    }

    let leap = reply[0] >> 6;
    let mode = reply[0] & 0x07;
    let stratum = reply[1];

    if mode != MODE_SERVER && mode != MODE_BROADCAST {
        return Err(NtpError::UnexpectedMode(mode));
    }
    if stratum == 0 {
        return Err(NtpError::KissOfDeath);
    }
    if leap == LEAP_ALARM {
        return Err(NtpError::ServerUnsynchronized);
    }

    let seconds = be_u32(reply, 40);
    let fraction = be_u32(reply, 44);
    if seconds == 0 && fraction == 0 {
        return Err(NtpError::MissingTimestamp);
    }

    Ok(NtpTimestamp {
        unix_secs: ntp_to_unix(seconds),
        fraction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(header: u8, stratum: u8, seconds: u32, fraction: u32) -> [u8; NTP_PACKET_LEN] {
        let mut packet = [0u8; NTP_PACKET_LEN];
        packet[0] = header;
        packet[1] = stratum;
        packet[40..44].copy_from_slice(&seconds.to_be_bytes());
        packet[44..48].copy_from_slice(&fraction.to_be_bytes());
        packet
    }

    #[test]
    fn request_header_is_v4_client() {
        let req = build_request();
        assert_eq!(req[0], 0x23);
        assert!(req[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn parses_server_reply() {
        // 2024-02-29T22:15:30Z, half a second past.
        let ntp_secs = (1_709_244_930i64 + NTP_TO_UNIX_SECS) as u32;
        let ts = parse_response(&reply(0x24, 2, ntp_secs, 0x8000_0000)).unwrap();
        assert_eq!(ts.unix_secs, 1_709_244_930);
        assert_eq!(ts.micros(), 500_000);
        assert_eq!(ts.rounded_unix_secs(), 1_709_244_931);
    }

    #[test]
    fn handles_era_rollover() {
        // Shortly after the 2036 rollover the seconds field restarts near 0.
        let ts = parse_response(&reply(0x24, 1, 10, 0)).unwrap();
        assert_eq!(ts.unix_secs, NTP_ERA_SECS - NTP_TO_UNIX_SECS + 10);
    }

    #[test]
    fn rejects_bad_replies() {
        assert_eq!(parse_response(&[0u8; 12]), Err(NtpError::TooShort(12)));
        assert_eq!(
            parse_response(&reply(0x23, 2, 1, 0)),
            Err(NtpError::UnexpectedMode(3))
        );
        assert_eq!(
            parse_response(&reply(0x24, 0, 1, 0)),
            Err(NtpError::KissOfDeath)
        );
        assert_eq!(
            parse_response(&reply(0xE4, 2, 1, 0)),
            Err(NtpError::ServerUnsynchronized)
        );
        assert_eq!(
            parse_response(&reply(0x24, 2, 0, 0)),
            Err(NtpError::MissingTimestamp)
        );
    }
}
