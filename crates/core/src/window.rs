use chrono::{DateTime, Days, LocalResult, NaiveDateTime, Offset, TimeDelta, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Aligned time bucket used for per-user rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    /// Five-minute buckets aligned to minutes divisible by five.
    #[serde(rename = "5min")]
    FiveMinutes,
    /// Buckets starting at the top of each hour.
    #[serde(rename = "hour")]
    Hour,
    /// Buckets starting at local midnight.
    #[serde(rename = "day")]
    Day,
}

impl WindowKind {
    /// All window kinds, shortest first.
    pub const ALL: [Self; 3] = [Self::FiveMinutes, Self::Hour, Self::Day];

    /// Short label used in counter keys and error messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::FiveMinutes => "5min",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// Floor `now` to the start of its window, in `now`'s time zone.
    #[must_use]
    pub fn window_start<Tz: TimeZone>(self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let floored = self.floor_local(now.naive_local());
        resolve_local(now, floored)
    }

    /// Start of the window following the one containing `now`.
    #[must_use]
    pub fn next_window_start<Tz: TimeZone>(self, now: &DateTime<Tz>) -> DateTime<Tz> {
        match self {
            Self::FiveMinutes => self.window_start(now) + TimeDelta::minutes(5),
            Self::Hour => self.window_start(now) + TimeDelta::hours(1),
            Self::Day => {
                let floored = self.floor_local(now.naive_local());
                let next = floored
                    .checked_add_days(Days::new(1))
                    .unwrap_or(floored + TimeDelta::days(1));
                resolve_local(now, next)
            }
        }
    }

    fn floor_local(self, local: NaiveDateTime) -> NaiveDateTime {
        let date = local.date();
        let floored = match self {
            Self::FiveMinutes => {
                date.and_hms_opt(local.hour(), local.minute() - local.minute() % 5, 0)
            }
            Self::Hour => date.and_hms_opt(local.hour(), 0, 0),
            Self::Day => date.and_hms_opt(0, 0, 0),
        };
        floored.unwrap_or(local)
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a wall-clock time back into the reference zone.
///
/// A wall-clock time repeated by a DST fold takes the reference offset when
/// one of its mappings has it, else the earlier one. A wall-clock time
/// skipped by a DST jump is read with the reference offset.
fn resolve_local<Tz: TimeZone>(reference: &DateTime<Tz>, local: NaiveDateTime) -> DateTime<Tz> {
    let tz = reference.timezone();
    let reference_offset = reference.offset().fix();
    match tz.from_local_datetime(&local) {
        LocalResult::Single(resolved) => resolved,
        LocalResult::Ambiguous(earlier, later) => {
            if later.offset().fix() == reference_offset {
                later
            } else {
                earlier
            }
        }
        LocalResult::None => {
            let offset = TimeDelta::seconds(i64::from(reference_offset.local_minus_utc()));
            tz.from_utc_datetime(&(local - offset))
        }
    }
}
