use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;

/// Due dates within this many days of today get the "soon" badge.
pub const SOON_DAYS: i64 = 3;

/// Serde adapter storing `DateTime<Utc>` as integer epoch milliseconds.
pub mod epoch_millis {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(value.timestamp_millis())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = f64::deserialize(deserializer)?;
        from_millis(millis).ok_or_else(|| D::Error::custom(format!("timestamp out of range: {millis}")))
    }

    // JSON numbers written by other tools may carry a fraction.
    fn from_millis(millis: f64) -> Option<DateTime<Utc>> {
        if !millis.is_finite() {
            return None;
        }
        DateTime::from_timestamp_millis(millis.trunc() as i64)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dt) => serializer.serialize_some(&dt.timestamp_millis()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let Some(millis) = Option::<f64>::deserialize(deserializer)? else {
                return Ok(None);
            };
            super::from_millis(millis)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {millis}")))
        }
    }
}

/// Serde adapter for an optional calendar date that also accepts `""`.
pub mod due_date {
    use chrono::NaiveDate;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(date) => serializer.serialize_some(&date.format("%Y-%m-%d").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid due date '{text}': {e}"))),
        }
    }
}

pub fn parse_timezone(name: &str) -> anyhow::Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| anyhow!("unknown timezone '{name}': {e}"))
}

/// Calendar date of `now` as seen in `tz`.
pub fn today_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Parses a due date: `YYYY-MM-DD`, `today`, `tomorrow`, a weekday name
/// (next occurrence, never today), or a relative `+3d` / `2w` offset.
pub fn parse_due(expr: &str, today: NaiveDate) -> anyhow::Result<NaiveDate> {
    let text = expr.trim().to_ascii_lowercase();
    match text.as_str() {
        "" => return Err(anyhow!("due date cannot be empty")),
        "today" => return Ok(today),
        "tomorrow" => return add_days(today, 1),
        _ => {}
    }

    if let Some(weekday) = parse_weekday(&text) {
        let current = today.weekday().num_days_from_monday();
        let target = weekday.num_days_from_monday();
        let ahead = (7 + target - current) % 7;
        return add_days(today, if ahead == 0 { 7 } else { u64::from(ahead) });
    }

    let rel_re = Regex::new(r"^\+?(?P<num>\d{1,4})\s*(?P<unit>[dw])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
    if let Some(caps) = rel_re.captures(&text) {
        let amount: u64 = caps["num"]
            .parse()
            .with_context(|| format!("invalid offset in '{expr}'"))?;
        let days = if &caps["unit"] == "w" { amount * 7 } else { amount };
        return add_days(today, days);
    }

    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .with_context(|| format!("invalid due date '{expr}': expected YYYY-MM-DD"))
}

fn add_days(date: NaiveDate, days: u64) -> anyhow::Result<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| anyhow!("date out of range"))
}

fn parse_weekday(text: &str) -> Option<Weekday> {
    match text {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueBadge {
    Overdue(i64),
    Today,
    Tomorrow,
    Soon(NaiveDate),
    Scheduled(NaiveDate),
}

impl DueBadge {
    pub fn label(&self) -> String {
        match self {
            Self::Overdue(days) => format!("{days}d overdue"),
            Self::Today => "Today".to_string(),
            Self::Tomorrow => "Tomorrow".to_string(),
            Self::Soon(date) | Self::Scheduled(date) => date.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn is_urgent(&self) -> bool {
        !matches!(self, Self::Scheduled(_))
    }
}

pub fn due_badge(due: NaiveDate, today: NaiveDate) -> DueBadge {
    let diff = due.signed_duration_since(today).num_days();
    match diff {
        d if d < 0 => DueBadge::Overdue(-d),
        0 => DueBadge::Today,
        1 => DueBadge::Tomorrow,
        d if d <= SOON_DAYS => DueBadge::Soon(due),
        _ => DueBadge::Scheduled(due),
    }
}
