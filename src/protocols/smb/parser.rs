//! Parsing of smbclient output
//!
//! Stateless functions turning raw response lines into entries, stat
//! records, share lists, change events and classified errors. smbclient
//! reports success as silence: an empty response is success for every
//! command, and anything else on a mutating command is an error.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use super::error::{status_error, FailureKind, Result, SmbError};
use super::types::{ChangeCode, ChangeEvent, Mode, RemoteEntry, ShareInfo};

/// Prefix smbclient uses when the local side of `get`/`put` cannot be opened
pub const LOCAL_OPEN_FAILURE: &str = "Error opening local file ";

/// Prefix of a failed notify
pub const NOTIFY_FAILURE: &str = "notify returned ";

/// Fields `allinfo` reports that a stat needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatRecord {
    pub mtime: DateTime<Utc>,
    pub mode: Mode,
    pub size: u64,
}

fn listing_regex() -> &'static Regex {
    static LISTING: OnceLock<Regex> = OnceLock::new();
    // name, at least four spaces, optional mode letters, size, date
    LISTING.get_or_init(|| {
        Regex::new(r"^\s*(.*?)\s\s\s\s+(?:([NDHARS]*)\s+)?([0-9]+)\s+(.*)$")
            .expect("listing pattern is valid")
    })
}

/// Join a name onto a `/`-separated base path
pub fn join_path(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Parse a `dir` response
///
/// The last line (disk usage summary) is always dropped; `.` and `..` are
/// skipped; lines not matching the column layout are ignored.
pub fn parse_listing(lines: &[String], base_path: &str, tz: FixedOffset) -> Vec<RemoteEntry> {
    let Some((_, entries)) = lines.split_last() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|line| listing_regex().captures(line))
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            if name == "." || name == ".." {
                return None;
            }
            let mode = Mode::from_letters(caps.get(2).map_or("", |m| m.as_str()));
            let size = caps.get(3)?.as_str().parse().unwrap_or(0);
            let mtime = parse_listing_date(caps.get(4)?.as_str(), tz).unwrap_or_default();
            Some(RemoteEntry {
                path: join_path(base_path, name),
                name: name.to_string(),
                size,
                mtime,
                mode,
            })
        })
        .collect()
}

/// Parse an `allinfo` response; missing keys default to zero
pub fn parse_stat(lines: &[String], tz: FixedOffset) -> StatRecord {
    let mut write_time = None;
    let mut attributes = None;
    let mut stream = None;
    for line in lines {
        let (key, value) = line.split_once(':').unwrap_or((line.as_str(), ""));
        let value = value.trim();
        let slot = match key.trim() {
            "write_time" => &mut write_time,
            "attributes" => &mut attributes,
            "stream" => &mut stream,
            _ => continue,
        };
        // the first occurrence wins; files can list several streams
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    let mtime = write_time
        .and_then(|value| parse_loose_date(value, tz))
        .unwrap_or_default();
    let mode = attributes
        .and_then(parse_attribute_hex)
        .map(Mode::from_bits_retain)
        .unwrap_or_default();
    let size = stream
        .and_then(|value| value.split(' ').nth(1))
        .and_then(|size| size.parse().ok())
        .unwrap_or(0);
    StatRecord { mtime, mode, size }
}

/// `A (20)` -> 0x20
fn parse_attribute_hex(value: &str) -> Option<u32> {
    let start = value.find('(')? + 1;
    let end = value[start..].find(')').map_or(value.len(), |i| start + i);
    u32::from_str_radix(value[start..end].trim(), 16).ok()
}

/// Classify a command response; empty output is success
pub fn check_for_error(lines: &[String], path: &str) -> Result<()> {
    let Some(first) = lines.first() else {
        return Ok(());
    };
    if first.contains("does not exist") {
        return Err(SmbError::failure(FailureKind::NotFound, path));
    }
    if let Some(local) = first.strip_prefix(LOCAL_OPEN_FAILURE) {
        return Err(SmbError::LocalResource {
            path: local.trim().trim_matches('"').to_string(),
        });
    }
    match error_code(first) {
        Some(code) => Err(status_error(code, path)),
        None => Err(SmbError::with_code(FailureKind::Generic, path, first.trim())),
    }
}

/// First whitespace-separated token that is an `NT_STATUS_*` code
pub fn error_code(line: &str) -> Option<&str> {
    line.split_whitespace()
        .map(|token| token.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '_')))
        .find(|token| token.starts_with("NT_STATUS"))
}

/// Parse a share list in either the grepable (`Disk|name|comment`) or the
/// columnar format; only disk shares are kept
pub fn parse_shares(lines: &[String]) -> Vec<ShareInfo> {
    let mut shares = Vec::new();
    for line in lines {
        if line.contains('|') {
            let mut parts = line.splitn(3, '|');
            let (Some(kind), Some(name)) = (parts.next(), parts.next()) else {
                continue;
            };
            if kind.eq_ignore_ascii_case("disk") {
                shares.push(ShareInfo {
                    name: name.to_string(),
                    comment: parts.next().unwrap_or("").to_string(),
                });
            }
        } else if let Some((name, comment)) = line.split_once("Disk") {
            let name = name.trim();
            if !name.is_empty() {
                shares.push(ShareInfo {
                    name: name.to_string(),
                    comment: comment.trim().to_string(),
                });
            }
        }
    }
    shares
}

/// Decode one notify line: `<4-digit code> <sub path>`
///
/// Lines with code 0 or an unknown code yield `None`; a `notify returned`
/// line is a classified failure.
pub fn parse_change_line(line: &str, base_path: &str) -> Result<Option<ChangeEvent>> {
    if let Some(status) = line.strip_prefix(NOTIFY_FAILURE) {
        let status = status.trim();
        let err = match status {
            "NT_STATUS_REVISION_MISMATCH" | "NT_STATUS_NOT_SUPPORTED" => SmbError::with_code(
                FailureKind::Generic,
                format!("{base_path} (notify is not supported with the negotiated protocol)"),
                status,
            ),
            _ => status_error(status, base_path),
        };
        return Err(err);
    }

    let code = line
        .get(..4)
        .and_then(|code| code.trim().parse::<u32>().ok())
        .and_then(ChangeCode::from_code);
    let Some(code) = code else {
        return Ok(None);
    };
    let sub_path = line.get(5..).unwrap_or("").replace('\\', "/");
    let path = if base_path.is_empty() {
        sub_path
    } else {
        join_path(base_path, &sub_path)
    };
    Ok(Some(ChangeEvent { code, path }))
}

/// `Thu Oct 15 10:11:12 2026` in the host's time zone
pub fn parse_listing_date(value: &str, tz: FixedOffset) -> Option<DateTime<Utc>> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    let naive = NaiveDateTime::parse_from_str(&collapsed, "%a %b %d %H:%M:%S %Y").ok()?;
    local_to_utc(naive, tz)
}

/// Dates as `allinfo` prints them, with or without AM/PM and a trailing zone
fn parse_loose_date(value: &str, tz: FixedOffset) -> Option<DateTime<Utc>> {
    let mut tokens: Vec<&str> = value.split_whitespace().collect();
    let mut zone = tz;
    if let Some(last) = tokens.last() {
        if let Some(offset) = parse_offset(last) {
            zone = offset;
            tokens.pop();
        } else if last.chars().all(|c| c.is_ascii_alphabetic()) && tokens.len() > 5 {
            // named zones like CEST cannot be resolved; use the host offset
            tokens.pop();
        }
    }
    let collapsed = tokens.join(" ");
    ["%a %b %d %I:%M:%S %p %Y", "%a %b %d %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&collapsed, format).ok())
        .and_then(|naive| local_to_utc(naive, zone))
}

fn local_to_utc(naive: NaiveDateTime, tz: FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `+0200` / `-0530` -> offset
pub fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    let (sign, digits) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
