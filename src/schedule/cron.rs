use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Search horizon for the next cron occurrence. Long enough for `29 2`
/// schedules to find the next leap day.
const MAX_SEARCH_YEARS: i64 = 9;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

pub fn parse_timezone(raw: &str) -> Result<Tz, String> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|_| format!("invalid timezone `{raw}`; expected IANA timezone id"))
}

/// One cron field as a bitmask of allowed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    any: bool,
}

impl Field {
    fn matches(self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Names {
    Plain,
    Month,
    Weekday,
}

/// Five-field cron expression: minute hour day-of-month month day-of-week.
///
/// Day of month and day of week combine the classic way: when both are
/// restricted a day matching either one fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpression {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpression {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let expanded = match raw.trim() {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other => other,
        };
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(
                "cron expression must use 5 fields: minute hour day_of_month month day_of_week"
                    .to_string(),
            );
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59, Names::Plain)?,
            hour: parse_field(fields[1], 0, 23, Names::Plain)?,
            day_of_month: parse_field(fields[2], 1, 31, Names::Plain)?,
            month: parse_field(fields[3], 1, 12, Names::Month)?,
            day_of_week: parse_field(fields[4], 0, 7, Names::Weekday)?,
        })
    }

    fn day_matches<T: Datelike>(&self, date: &T) -> bool {
        if !self.month.matches(date.month()) {
            return false;
        }
        let by_month_day = self.day_of_month.matches(date.day());
        let by_weekday = self
            .day_of_week
            .matches(date.weekday().num_days_from_sunday());
        if self.day_of_month.any || self.day_of_week.any {
            by_month_day && by_weekday
        } else {
            by_month_day || by_weekday
        }
    }

    /// First occurrence strictly after `after`, evaluated in `timezone`.
    ///
    /// Walks forward in UTC minutes, skipping whole local hours that cannot
    /// match; local times that a DST jump skips never fire.
    pub fn next_after(&self, after: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = after + Duration::days(366 * MAX_SEARCH_YEARS);
        let mut candidate = start;
        while candidate <= horizon {
            let local = candidate.with_timezone(&timezone);
            if !self.day_matches(&local) || !self.hour.matches(local.hour()) {
                candidate += Duration::minutes(i64::from(60 - local.minute()));
                continue;
            }
            if self.minute.matches(local.minute()) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn parse_field(raw: &str, min: u32, max: u32, names: Names) -> Result<Field, String> {
    if raw == "*" {
        let top = if names == Names::Weekday { 6 } else { max };
        return Ok(Field {
            bits: span_bits(min, top, 1),
            any: true,
        });
    }
    let mut bits = 0u64;
    for segment in raw.split(',') {
        bits |= parse_segment(segment, min, max, names)?;
    }
    if bits == 0 {
        return Err(format!("invalid cron field `{raw}`"));
    }
    Ok(Field { bits, any: false })
}

fn parse_segment(raw: &str, min: u32, max: u32, names: Names) -> Result<u64, String> {
    let (range, step) = match raw.split_once('/') {
        Some((range, step_raw)) => {
            let step = step_raw
                .parse::<u32>()
                .map_err(|_| format!("invalid cron step `{step_raw}`"))?;
            if step == 0 {
                return Err("cron step must be >= 1".to_string());
            }
            (range, step)
        }
        None => (raw, 1),
    };

    let (start, end) = if range == "*" {
        (min, max)
    } else if let Some((start_raw, end_raw)) = range.split_once('-') {
        (
            parse_value(start_raw, min, max, names)?,
            parse_value(end_raw, min, max, names)?,
        )
    } else {
        let value = parse_value(range, min, max, names)?;
        // `5/15` means "from 5 to the end, every 15".
        if raw.contains('/') {
            (value, max)
        } else {
            (value, value)
        }
    };
    if start > end {
        return Err(format!("invalid cron range `{raw}`"));
    }

    let mut bits = span_bits(start, end, step);
    if names == Names::Weekday && bits & (1 << 7) != 0 {
        bits = (bits & !(1 << 7)) | 1;
    }
    Ok(bits)
}

fn span_bits(start: u32, end: u32, step: u32) -> u64 {
    (start..=end)
        .step_by(step as usize)
        .fold(0u64, |bits, value| bits | (1u64 << value))
}

fn parse_value(raw: &str, min: u32, max: u32, names: Names) -> Result<u32, String> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    const WEEKDAYS: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

    let lower = raw.to_ascii_lowercase();
    let named = match names {
        Names::Plain => None,
        Names::Month => MONTHS.iter().position(|name| *name == lower).map(|i| i + 1),
        Names::Weekday => WEEKDAYS.iter().position(|name| *name == lower),
    };
    let value = match named {
        Some(index) => u32::try_from(index).map_err(|_| format!("invalid cron value `{raw}`"))?,
        None => lower
            .parse::<u32>()
            .map_err(|_| format!("invalid cron value `{raw}`"))?,
    };
    if value < min || value > max {
        return Err(format!(
            "cron value `{raw}` is out of bounds ({min}..={max})"
        ));
    }
    Ok(value)
}

/// When a scheduled task fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Cron {
        expression: CronExpression,
        timezone: Tz,
    },
    /// Fires once at the given instant.
    Once(DateTime<Utc>),
}

impl Schedule {
    /// Parses an ISO-8601 timestamp as a one-shot schedule and anything else
    /// as a cron expression. Timestamps without an offset are read in
    /// `timezone`.
    pub fn parse(raw: &str, timezone: &str) -> Result<Self, String> {
        let tz = parse_timezone(timezone)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("schedule must be non-empty".to_string());
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::Once(at.with_timezone(&Utc)));
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                let local = tz.from_local_datetime(&naive).earliest().ok_or_else(|| {
                    format!("`{trimmed}` does not exist in timezone `{timezone}`")
                })?;
                return Ok(Self::Once(local.with_timezone(&Utc)));
            }
        }
        Ok(Self::Cron {
            expression: CronExpression::parse(trimmed)?,
            timezone: tz,
        })
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::Once(_))
    }

    /// Next fire time for a task that has not fired since `now`. A one-shot
    /// schedule keeps its instant even when it is already past, so the miss
    /// is visible; once it has run it never fires again.
    pub fn next_run(&self, now: DateTime<Utc>, has_run: bool) -> Option<DateTime<Utc>> {
        match self {
            Self::Once(at) => (!has_run).then_some(*at),
            Self::Cron {
                expression,
                timezone,
            } => expression.next_after(now, *timezone),
        }
    }
}
