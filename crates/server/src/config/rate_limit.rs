use chrono_tz::Tz;
use chunkgate_gateway::RateLimits;
use serde::Deserialize;

/// Per-user link issuance limits.
///
/// Windows are aligned to wall-clock boundaries in `timezone`. The value
/// `"local"` uses the host's local time zone.
#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_5min")]
    pub per_5min: u32,
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
    #[serde(default = "default_per_day")]
    pub per_day: u32,
    /// IANA time zone name, e.g. `"Europe/Berlin"`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_5min: default_per_5min(),
            per_hour: default_per_hour(),
            per_day: default_per_day(),
            timezone: default_timezone(),
        }
    }
}

impl RateLimitConfig {
    pub fn limits(&self) -> RateLimits {
        RateLimits {
            per_5min: self.per_5min,
            per_hour: self.per_hour,
            per_day: self.per_day,
        }
    }

    /// Parse the configured zone. `Ok(None)` selects local time.
    pub fn parse_timezone(&self) -> Result<Option<Tz>, String> {
        let name = self.timezone.trim();
        if name.eq_ignore_ascii_case("local") {
            return Ok(None);
        }
        name.parse::<Tz>()
            .map(Some)
            .map_err(|e| format!("unknown rate limit time zone {name:?}: {e}"))
    }
}

fn default_per_5min() -> u32 {
    1
}

fn default_per_hour() -> u32 {
    5
}

fn default_per_day() -> u32 {
    20
}

fn default_timezone() -> String {
    "Europe/Berlin".to_owned()
}
