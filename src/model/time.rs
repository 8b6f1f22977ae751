//! Time granularities, date parts and custom grains.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Standard time granularity, ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGranularity {
    pub const ALL: [TimeGranularity; 11] = [
        TimeGranularity::Nanosecond,
        TimeGranularity::Microsecond,
        TimeGranularity::Millisecond,
        TimeGranularity::Second,
        TimeGranularity::Minute,
        TimeGranularity::Hour,
        TimeGranularity::Day,
        TimeGranularity::Week,
        TimeGranularity::Month,
        TimeGranularity::Quarter,
        TimeGranularity::Year,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TimeGranularity::Nanosecond => "nanosecond",
            TimeGranularity::Microsecond => "microsecond",
            TimeGranularity::Millisecond => "millisecond",
            TimeGranularity::Second => "second",
            TimeGranularity::Minute => "minute",
            TimeGranularity::Hour => "hour",
            TimeGranularity::Day => "day",
            TimeGranularity::Week => "week",
            TimeGranularity::Month => "month",
            TimeGranularity::Quarter => "quarter",
            TimeGranularity::Year => "year",
        }
    }

    /// Every granularity at least as coarse as this one, finest first.
    pub fn coarser_or_equal(self) -> impl Iterator<Item = TimeGranularity> {
        Self::ALL.into_iter().filter(move |g| *g >= self)
    }
}

impl fmt::Display for TimeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimeGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|g| g.name() == lowered)
            .ok_or_else(|| format!("unknown time granularity '{}'", s))
    }
}

/// A component extracted from a timestamp with `EXTRACT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePart {
    Year,
    Quarter,
    Month,
    Day,
    Dow,
    Doy,
}

impl DatePart {
    pub const ALL: [DatePart; 6] = [
        DatePart::Year,
        DatePart::Quarter,
        DatePart::Month,
        DatePart::Day,
        DatePart::Dow,
        DatePart::Doy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Quarter => "quarter",
            DatePart::Month => "month",
            DatePart::Day => "day",
            DatePart::Dow => "dow",
            DatePart::Doy => "doy",
        }
    }

    /// The granularity this part represents. A part can only be extracted
    /// from a value whose granularity is at most this fine.
    pub fn size(&self) -> TimeGranularity {
        match self {
            DatePart::Year => TimeGranularity::Year,
            DatePart::Quarter => TimeGranularity::Quarter,
            DatePart::Month => TimeGranularity::Month,
            DatePart::Day | DatePart::Dow | DatePart::Doy => TimeGranularity::Day,
        }
    }

    /// Date parts whose size is at least `granularity`.
    pub fn compatible_with(granularity: TimeGranularity) -> impl Iterator<Item = DatePart> {
        Self::ALL.into_iter().filter(move |p| p.size() >= granularity)
    }
}

impl fmt::Display for DatePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatePart {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == lowered)
            .ok_or_else(|| format!("unknown date part '{}'", s))
    }
}

/// A granularity that is either standard or a custom grain defined on the
/// time spine. Custom grains carry the standard granularity they are built on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpandedTimeGranularity {
    pub base_granularity: TimeGranularity,
    pub name: String,
}

impl ExpandedTimeGranularity {
    pub fn from_standard(granularity: TimeGranularity) -> Self {
        Self {
            base_granularity: granularity,
            name: granularity.name().to_string(),
        }
    }

    pub fn custom(name: impl Into<String>, base_granularity: TimeGranularity) -> Self {
        Self {
            base_granularity,
            name: name.into(),
        }
    }

    pub fn is_custom(&self) -> bool {
        self.name != self.base_granularity.name()
    }
}

impl From<TimeGranularity> for ExpandedTimeGranularity {
    fn from(granularity: TimeGranularity) -> Self {
        Self::from_standard(granularity)
    }
}

impl fmt::Display for ExpandedTimeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_ordering() {
        assert!(TimeGranularity::Day < TimeGranularity::Week);
        assert!(TimeGranularity::Quarter < TimeGranularity::Year);
        let coarser: Vec<_> = TimeGranularity::Month.coarser_or_equal().collect();
        assert_eq!(
            coarser,
            vec![
                TimeGranularity::Month,
                TimeGranularity::Quarter,
                TimeGranularity::Year
            ]
        );
    }

    #[test]
    fn test_granularity_from_str() {
        assert_eq!("MONTH".parse::<TimeGranularity>(), Ok(TimeGranularity::Month));
        assert!("fortnight".parse::<TimeGranularity>().is_err());
    }

    #[test]
    fn test_date_parts_compatible_with_month() {
        let parts: Vec<_> = DatePart::compatible_with(TimeGranularity::Month).collect();
        assert_eq!(
            parts,
            vec![DatePart::Year, DatePart::Quarter, DatePart::Month]
        );
    }

    #[test]
    fn test_date_parts_compatible_with_day() {
        assert_eq!(DatePart::compatible_with(TimeGranularity::Day).count(), 6);
        assert_eq!(DatePart::compatible_with(TimeGranularity::Year).count(), 1);
    }

    #[test]
    fn test_expanded_granularity() {
        let standard = ExpandedTimeGranularity::from_standard(TimeGranularity::Week);
        assert!(!standard.is_custom());
        let custom = ExpandedTimeGranularity::custom("fiscal_quarter", TimeGranularity::Day);
        assert!(custom.is_custom());
        assert_eq!(custom.to_string(), "fiscal_quarter");
    }
}
