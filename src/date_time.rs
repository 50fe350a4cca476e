use chrono::{DateTime as ChronoDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// UTC timestamp carried in annotations, records and results as RFC 3339
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime(pub ChronoDateTime<Utc>);

impl Serialize for DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse(&s).ok_or_else(|| de::Error::custom(format!("invalid timestamp {s:?}")))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl DateTime {
    /// Current time, truncated to whole seconds like its serialized form
    pub fn now() -> Self {
        DateTime(Utc::now().trunc_subsecs(0))
    }

    pub fn parse(s: &str) -> Option<Self> {
        ChronoDateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| DateTime(dt.with_timezone(&Utc)))
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn is_past(&self) -> bool {
        self.0 <= Utc::now()
    }

    pub fn plus(&self, duration: chrono::Duration) -> Self {
        DateTime(self.0 + duration)
    }
}

impl From<ChronoDateTime<Utc>> for DateTime {
    fn from(dt: ChronoDateTime<Utc>) -> Self {
        DateTime(dt)
    }
}
