use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::HarnessError;

/// A link data rate in bits per second.
///
/// Parses the usual textual forms (`"10Mbps"`, `"2 Mb/s"`, `"500kbps"`,
/// `"1Gbps"`, `"125KBps"` for bytes per second, or a bare number of bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate {
    bps: u64,
}

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        Self { bps }
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        Self {
            bps: mbps * 1_000_000,
        }
    }

    pub fn bps(&self) -> u64 {
        self.bps
    }

    /// Time needed to clock `bytes` onto the wire at this rate, rounded up to the nanosecond.
    pub fn tx_time(&self, bytes: u32) -> Duration {
        if self.bps == 0 {
            return Duration::MAX;
        }
        let bits = (bytes as u128) * 8;
        let nanos = (bits * 1_000_000_000 + (self.bps as u128 - 1)) / self.bps as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

impl FromStr for DataRate {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || HarnessError::Malformed {
            field: "data rate",
            value: s.to_string(),
        };
        let (number, unit) = split_number(s.trim()).ok_or_else(malformed)?;
        let multiplier: f64 = match unit {
            "" | "bps" | "b/s" => 1.0,
            "kbps" | "Kbps" | "kb/s" | "Kb/s" => 1e3,
            "Mbps" | "mbps" | "Mb/s" => 1e6,
            "Gbps" | "gbps" | "Gb/s" => 1e9,
            "Bps" | "B/s" => 8.0,
            "KBps" | "kBps" | "KB/s" | "kB/s" => 8e3,
            "MBps" | "MB/s" => 8e6,
            "GBps" | "GB/s" => 8e9,
            _ => return Err(malformed()),
        };
        let bps = number * multiplier;
        if !bps.is_finite() || bps < 1.0 {
            return Err(malformed());
        }
        Ok(Self::from_bps(bps.round() as u64))
    }
}

impl TryFrom<String> for DataRate {
    type Error = HarnessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataRate> for String {
    fn from(rate: DataRate) -> Self {
        rate.to_string()
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.bps;
        if bps >= 1_000_000_000 && bps % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", bps / 1_000_000_000)
        } else if bps >= 1_000_000 && bps % 1_000_000 == 0 {
            write!(f, "{}Mbps", bps / 1_000_000)
        } else if bps >= 1_000 && bps % 1_000 == 0 {
            write!(f, "{}kbps", bps / 1_000)
        } else {
            write!(f, "{}bps", bps)
        }
    }
}

/// Parse a delay such as `"50ms"`, `"0.01ms"`, `"175 ms"`, `"2s"` or `"1500us"`.
/// A bare number is taken as seconds.
pub fn parse_delay(s: &str) -> Result<Duration, HarnessError> {
    let malformed = || HarnessError::Malformed {
        field: "delay",
        value: s.to_string(),
    };
    let (number, unit) = split_number(s.trim()).ok_or_else(malformed)?;
    let nanos_per_unit = match unit {
        "" | "s" => 1e9,
        "ms" => 1e6,
        "us" => 1e3,
        "ns" => 1.0,
        "min" => 60e9,
        _ => return Err(malformed()),
    };
    let nanos = (number * nanos_per_unit).round();
    if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
        return Err(malformed());
    }
    Ok(Duration::from_nanos(nanos as u64))
}

/// Render a delay in the most compact unit that represents it exactly.
pub fn format_delay(delay: Duration) -> String {
    let nanos = delay.as_nanos();
    if nanos == 0 {
        "0s".to_string()
    } else if nanos % 1_000_000_000 == 0 {
        format!("{}s", nanos / 1_000_000_000)
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{}ns", nanos)
    }
}

fn split_number(s: &str) -> Option<(f64, &str)> {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == 'e' || *c == '-' || *c == '+'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let number: f64 = s[..end].trim().parse().ok()?;
    Some((number, s[end..].trim()))
}

/// Serde adapter storing a `Duration` as a delay string (`"50ms"`).
pub mod delay_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_delay(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_delay(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_rates() {
        assert_eq!("10Mbps".parse::<DataRate>().unwrap().bps(), 10_000_000);
        assert_eq!("2 Mb/s".parse::<DataRate>().unwrap().bps(), 2_000_000);
        assert_eq!("500kbps".parse::<DataRate>().unwrap().bps(), 500_000);
        assert_eq!("1.5Gbps".parse::<DataRate>().unwrap().bps(), 1_500_000_000);
        assert_eq!("125KBps".parse::<DataRate>().unwrap().bps(), 1_000_000);
        assert_eq!("9600".parse::<DataRate>().unwrap().bps(), 9600);
    }

    #[test]
    fn rejects_malformed_rates() {
        for bad in ["", "fast", "10Xbps", "0Mbps", "-3Mbps"] {
            let err = bad.parse::<DataRate>().unwrap_err();
            assert!(matches!(err, HarnessError::Malformed { .. }), "{bad}");
        }
    }

    #[test]
    fn rate_display_round_trips_through_parse() {
        let rate = DataRate::from_mbps(10);
        assert_eq!(rate.to_string(), "10Mbps");
        assert_eq!(rate.to_string().parse::<DataRate>().unwrap(), rate);
        assert_eq!(DataRate::from_bps(1234).to_string(), "1234bps");
    }

    #[test]
    fn tx_time_rounds_up() {
        // 380 bytes at 2 Mbps = 1.52 ms exactly
        let rate = DataRate::from_mbps(2);
        assert_eq!(rate.tx_time(380), Duration::from_micros(1520));
        // 1 byte at 3 bps = 2.666..s, rounded up to the nanosecond
        let odd = DataRate::from_bps(3);
        assert_eq!(odd.tx_time(1), Duration::from_nanos(2_666_666_667));
    }

    #[test]
    fn parses_delays() {
        assert_eq!(parse_delay("50ms").unwrap(), Duration::from_millis(50));
        assert_eq!(parse_delay("175 ms").unwrap(), Duration::from_millis(175));
        assert_eq!(parse_delay("0.01ms").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_delay("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_delay("1500us").unwrap(), Duration::from_micros(1500));
        assert!(parse_delay("soon").is_err());
        assert!(parse_delay("5 parsecs").is_err());
    }

    #[test]
    fn formats_delays_compactly() {
        assert_eq!(format_delay(Duration::from_millis(85)), "85ms");
        assert_eq!(format_delay(Duration::from_secs(3)), "3s");
        assert_eq!(format_delay(Duration::from_micros(10)), "10us");
    }
}
