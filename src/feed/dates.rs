//! Publication date normalization.
//!
//! Feeds in the wild publish dates in a handful of layouts. [`normalize_date`]
//! tries a fixed list of them in priority order and returns the first match
//! with its UTC offset preserved. Named zones (`GMT`, `MSK`, `PST`, ...) are
//! resolved through a small table; unknown abbreviations are kept verbatim with
//! a zero offset so that reformatting reproduces the input.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Timelike};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    /// None of the known layouts matched.
    #[error("cannot parse date: {0:?}")]
    UnparsableDate(String),
}

/// Known feed date layouts, in the order [`normalize_date`] tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateLayout {
    /// `Mon, 02 Jan 2006 15:04:05 -0700`
    Rfc1123Z,
    /// `Mon, 02 Jan 2006 15:04:05 MST`
    Rfc1123,
    /// `02 Jan 06 15:04 -0700`
    Rfc822Z,
    /// `02 Jan 06 15:04 MST`
    Rfc822,
    /// `2006-01-02T15:04:05Z07:00`
    Rfc3339,
    /// `2006-01-02T15:04:05.999999999Z07:00`
    Rfc3339Nano,
    /// `Mon Jan _2 15:04:05 MST 2006`
    UnixDate,
}

impl DateLayout {
    pub const PRIORITY: [DateLayout; 7] = [
        DateLayout::Rfc1123Z,
        DateLayout::Rfc1123,
        DateLayout::Rfc822Z,
        DateLayout::Rfc822,
        DateLayout::Rfc3339,
        DateLayout::Rfc3339Nano,
        DateLayout::UnixDate,
    ];

    /// Parses `s` strictly according to this layout.
    pub fn parse(self, s: &str) -> Option<NormalizedDate> {
        let (time, zone) = match self {
            DateLayout::Rfc1123Z => {
                let rest = strip_weekday(s, ", ")?;
                let time = DateTime::parse_from_str(rest, "%d %b %Y %H:%M:%S %z").ok()?;
                (time, None)
            }
            DateLayout::Rfc1123 => {
                let rest = strip_weekday(s, ", ")?;
                let (naive, zone) = rest.rsplit_once(' ')?;
                let naive = NaiveDateTime::parse_from_str(naive, "%d %b %Y %H:%M:%S").ok()?;
                (attach_named_zone(naive, zone)?, Some(zone.to_string()))
            }
            DateLayout::Rfc822Z => {
                let time = DateTime::parse_from_str(s, "%d %b %y %H:%M %z").ok()?;
                (time, None)
            }
            DateLayout::Rfc822 => {
                let (naive, zone) = s.rsplit_once(' ')?;
                let naive = NaiveDateTime::parse_from_str(naive, "%d %b %y %H:%M").ok()?;
                (attach_named_zone(naive, zone)?, Some(zone.to_string()))
            }
            DateLayout::Rfc3339 | DateLayout::Rfc3339Nano => {
                // Both share a grammar; the fractional part decides which one matched.
                if s.as_bytes().get(10) != Some(&b'T') {
                    return None;
                }
                let has_fraction = s.get(19..).is_some_and(|tail| tail.starts_with('.'));
                if has_fraction != (self == DateLayout::Rfc3339Nano) {
                    return None;
                }
                (DateTime::parse_from_rfc3339(s).ok()?, None)
            }
            DateLayout::UnixDate => {
                let parts: Vec<&str> = s.split_whitespace().collect();
                let [weekday, month, day, clock, zone, year] = parts.as_slice() else {
                    return None;
                };
                if !is_weekday(weekday) {
                    return None;
                }
                let naive = NaiveDateTime::parse_from_str(
                    &format!("{month} {day} {clock} {year}"),
                    "%b %d %H:%M:%S %Y",
                )
                .ok()?;
                (attach_named_zone(naive, zone)?, Some(zone.to_string()))
            }
        };

        Some(NormalizedDate {
            time,
            zone,
            layout: self,
        })
    }

    /// Renders `date` in this layout.
    pub fn format(self, date: &NormalizedDate) -> String {
        let t = &date.time;
        match self {
            DateLayout::Rfc1123Z => t.format("%a, %d %b %Y %H:%M:%S %z").to_string(),
            DateLayout::Rfc1123 => format!(
                "{} {}",
                t.format("%a, %d %b %Y %H:%M:%S"),
                date.zone_label()
            ),
            DateLayout::Rfc822Z => t.format("%d %b %y %H:%M %z").to_string(),
            DateLayout::Rfc822 => format!("{} {}", t.format("%d %b %y %H:%M"), date.zone_label()),
            DateLayout::Rfc3339 => {
                format!("{}{}", t.format("%Y-%m-%dT%H:%M:%S"), rfc3339_offset(t))
            }
            DateLayout::Rfc3339Nano => {
                let nanos = t.nanosecond() % 1_000_000_000;
                let fraction = if nanos == 0 {
                    String::new()
                } else {
                    format!(".{:09}", nanos).trim_end_matches('0').to_string()
                };
                format!(
                    "{}{}{}",
                    t.format("%Y-%m-%dT%H:%M:%S"),
                    fraction,
                    rfc3339_offset(t)
                )
            }
            DateLayout::UnixDate => format!(
                "{} {} {}",
                t.format("%a %b %e %H:%M:%S"),
                date.zone_label(),
                t.format("%Y")
            ),
        }
    }
}

/// A parsed publication date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDate {
    time: DateTime<FixedOffset>,
    zone: Option<String>,
    layout: DateLayout,
}

impl NormalizedDate {
    pub fn new(time: DateTime<FixedOffset>, zone: Option<&str>, layout: DateLayout) -> Self {
        Self {
            time,
            zone: zone.map(str::to_string),
            layout,
        }
    }

    pub fn time(&self) -> DateTime<FixedOffset> {
        self.time
    }

    /// Zone abbreviation as written in the source, for named-zone layouts.
    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    /// The layout that matched.
    pub fn layout(&self) -> DateLayout {
        self.layout
    }

    fn zone_label(&self) -> String {
        match &self.zone {
            Some(zone) => zone.clone(),
            None if self.time.offset().local_minus_utc() == 0 => "UTC".to_string(),
            None => self.time.format("%z").to_string(),
        }
    }
}

/// Parses a feed date string, trying every [`DateLayout`] in priority order.
///
/// Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`DateError::UnparsableDate`] if no layout matches.
pub fn normalize_date(s: &str) -> Result<NormalizedDate, DateError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(DateError::UnparsableDate(s.to_string()));
    }

    DateLayout::PRIORITY
        .iter()
        .find_map(|layout| layout.parse(trimmed))
        .ok_or_else(|| DateError::UnparsableDate(s.to_string()))
}

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn is_weekday(s: &str) -> bool {
    WEEKDAYS.iter().any(|d| d.eq_ignore_ascii_case(s))
}

/// Removes a leading weekday name. The weekday is checked for syntax only:
/// feeds regularly publish weekdays that disagree with the date.
fn strip_weekday<'a>(s: &'a str, sep: &str) -> Option<&'a str> {
    let (weekday, rest) = s.split_once(sep)?;
    is_weekday(weekday).then_some(rest)
}

/// UTC offsets for the zone names that show up in feeds (RFC 822 plus a few
/// regional ones). Unknown names fall back to UTC.
fn named_zone_offset(zone: &str) -> i32 {
    const HOUR: i32 = 3600;
    match zone.to_ascii_uppercase().as_str() {
        "EST" => -5 * HOUR,
        "EDT" => -4 * HOUR,
        "CST" => -6 * HOUR,
        "CDT" => -5 * HOUR,
        "MST" => -7 * HOUR,
        "MDT" => -6 * HOUR,
        "PST" => -8 * HOUR,
        "PDT" => -7 * HOUR,
        "CET" => HOUR,
        "CEST" | "EET" => 2 * HOUR,
        "EEST" | "MSK" => 3 * HOUR,
        "JST" => 9 * HOUR,
        _ => 0,
    }
}

fn attach_named_zone(naive: NaiveDateTime, zone: &str) -> Option<DateTime<FixedOffset>> {
    if zone.is_empty() || zone.len() > 5 || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let offset = FixedOffset::east_opt(named_zone_offset(zone))?;
    offset.from_local_datetime(&naive).single()
}

fn rfc3339_offset(t: &DateTime<FixedOffset>) -> String {
    if t.offset().local_minus_utc() == 0 {
        "Z".to_string()
    } else {
        t.format("%:z").to_string()
    }
}
