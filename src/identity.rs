//! Author/committer identity and the Git date wire format.
//!
//! Mirrors `actions.py`'s `dt`/`gds2so` helpers: Git stores timezone offsets
//! with the sign inverted relative to the usual convention (`+0300` means
//! "subtract three hours to get UTC" becomes, in `GIT_*_DATE`, a string
//! whose sign is flipped from the stored offset). We keep that quirk since
//! it has to match what `git commit`/`git merge` actually read back.

use chrono::{DateTime, NaiveDateTime};

#[derive(Debug, thiserror::Error)]
pub enum DateError {
    #[error("date string too short: {0:?}")]
    TooShort(String),
    #[error("invalid timezone offset in {0:?}")]
    InvalidOffset(String),
    #[error("invalid timestamp in {0:?}: {1}")]
    InvalidTimestamp(String, chrono::ParseError),
}

/// A fully-resolved author or committer identity, as read off an original
/// commit and replayed onto the destination.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Timezone offset in seconds, in Git's own (sign-inverted) convention.
    pub tz_offset_seconds: i32,
}

impl CommitIdentity {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        timestamp: i64,
        tz_offset_seconds: i32,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            tz_offset_seconds,
        }
    }

    /// Render as the `GIT_{AUTHOR,COMMITTER}_DATE` wire value.
    pub fn date_string(&self) -> String {
        format_git_date(self.timestamp, self.tz_offset_seconds)
    }
}

/// Format `(unix_ts, tz_offset_seconds)` as `YYYY-MM-DD HH:MM:SS±HHMM`.
pub fn format_git_date(unix_ts: i64, tz_offset_seconds: i32) -> String {
    let naive_secs = unix_ts - tz_offset_seconds as i64;
    let naive = DateTime::from_timestamp(naive_secs, 0)
        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
        .naive_utc();
    let base = naive.format("%Y-%m-%d %H:%M:%S").to_string();
    let suffix = if tz_offset_seconds <= 0 {
        format!(
            "+{:02}{:02}",
            -tz_offset_seconds / 3600,
            (-tz_offset_seconds / 60) % 60
        )
    } else {
        format!(
            "-{:02}{:02}",
            tz_offset_seconds / 3600,
            (tz_offset_seconds / 60) % 60
        )
    };
    format!("{}{}", base, suffix)
}

/// Parse a `GIT_{AUTHOR,COMMITTER}_DATE`-shaped string back into
/// `(unix_ts, tz_offset_seconds)`, inverting the sign as `format_git_date` did.
pub fn parse_git_date(s: &str) -> Result<(i64, i32), DateError> {
    if s.len() < 5 {
        return Err(DateError::TooShort(s.to_string()));
    }
    let (datetime_str, offset_str) = s.split_at(s.len() - 5);
    let sign_byte = offset_str.as_bytes()[0];
    let sign: i32 = match sign_byte {
        b'+' => -1,
        b'-' => 1,
        _ => return Err(DateError::InvalidOffset(s.to_string())),
    };
    let hours: i32 = offset_str[1..3]
        .parse()
        .map_err(|_| DateError::InvalidOffset(s.to_string()))?;
    let minutes: i32 = offset_str[3..5]
        .parse()
        .map_err(|_| DateError::InvalidOffset(s.to_string()))?;
    let offset = sign * (hours * 3600 + minutes * 60);

    let naive = NaiveDateTime::parse_from_str(datetime_str.trim(), "%Y-%m-%d %H:%M:%S")
        .map_err(|e| DateError::InvalidTimestamp(s.to_string(), e))?;
    let ts = naive.and_utc().timestamp() + offset as i64;
    Ok((ts, offset))
}

/// Read a `CommitIdentity` back out of the four `GIT_{role}_*` env vars,
/// used by `plan_set_committer_by_env` when reconstructing state after an
/// interruption (spec.md §6, "Environment variables read by handlers").
pub fn identity_from_env(
    name_var: &str,
    email_var: &str,
    date_var: &str,
) -> Result<CommitIdentity, DateError> {
    let name = std::env::var(name_var).unwrap_or_default();
    let email = std::env::var(email_var).unwrap_or_default();
    let date = std::env::var(date_var).unwrap_or_default();
    let (ts, off) = parse_git_date(&date)?;
    Ok(CommitIdentity::new(name, email, ts, off))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_matches_git_sign_quirk() {
        // UTC+3 is commonly written GIT_*_DATE ...+0300 (offset stored as -10800).
        assert_eq!(
            format_git_date(1_700_000_000, -10800),
            "2023-11-14 22:13:20+0300"
        );
        // UTC-5 is written ...-0500 (offset stored as +18000).
        assert_eq!(
            format_git_date(1_700_000_000, 18000),
            "2023-11-14 14:13:20-0500"
        );
    }

    #[test]
    fn round_trip() {
        for (ts, off) in [(1_700_000_000i64, -10800i32), (1_700_000_000, 18000), (0, 0)] {
            let s = format_git_date(ts, off);
            let (ts2, off2) = parse_git_date(&s).unwrap();
            assert_eq!((ts, off), (ts2, off2), "round trip of {}", s);
        }
    }

    #[test]
    fn rejects_short_input() {
        assert!(parse_git_date("short").is_err());
    }
}
