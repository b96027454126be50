//! Date macros and their late resolution.
//!
//! Macros such as `TODAY` or `LAST_N_DAYS:30` are never turned into SQL text.
//! The compiler reserves a bound parameter for each occurrence and a
//! [`DateResolver`] fills it right before execution, in the caller's timezone.
//!
//! Every macro resolves to a single UTC instant on a period boundary:
//! `THIS_*`, `LAST_*`, `TODAY`, `YESTERDAY`, `TOMORROW` and `N_DAYS_AGO` give
//! the start of the named period, `NEXT_*` gives the end of the window (the
//! start of the period right after it). Weeks start on Monday.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::access::QueryContext;
use crate::error::{QueryError, QueryResult};

/// Macros that take no argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticDate {
    Today,
    Yesterday,
    Tomorrow,
    ThisWeek,
    LastWeek,
    NextWeek,
    ThisMonth,
    LastMonth,
    NextMonth,
    ThisQuarter,
    LastQuarter,
    NextQuarter,
    ThisYear,
    LastYear,
    NextYear,
    Last90Days,
    Next90Days,
}

impl StaticDate {
    pub fn from_name(name: &str) -> Option<Self> {
        let m = match name {
            "TODAY" => StaticDate::Today,
            "YESTERDAY" => StaticDate::Yesterday,
            "TOMORROW" => StaticDate::Tomorrow,
            "THIS_WEEK" => StaticDate::ThisWeek,
            "LAST_WEEK" => StaticDate::LastWeek,
            "NEXT_WEEK" => StaticDate::NextWeek,
            "THIS_MONTH" => StaticDate::ThisMonth,
            "LAST_MONTH" => StaticDate::LastMonth,
            "NEXT_MONTH" => StaticDate::NextMonth,
            "THIS_QUARTER" => StaticDate::ThisQuarter,
            "LAST_QUARTER" => StaticDate::LastQuarter,
            "NEXT_QUARTER" => StaticDate::NextQuarter,
            "THIS_YEAR" => StaticDate::ThisYear,
            "LAST_YEAR" => StaticDate::LastYear,
            "NEXT_YEAR" => StaticDate::NextYear,
            "LAST_90_DAYS" => StaticDate::Last90Days,
            "NEXT_90_DAYS" => StaticDate::Next90Days,
            _ => return None,
        };
        Some(m)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StaticDate::Today => "TODAY",
            StaticDate::Yesterday => "YESTERDAY",
            StaticDate::Tomorrow => "TOMORROW",
            StaticDate::ThisWeek => "THIS_WEEK",
            StaticDate::LastWeek => "LAST_WEEK",
            StaticDate::NextWeek => "NEXT_WEEK",
            StaticDate::ThisMonth => "THIS_MONTH",
            StaticDate::LastMonth => "LAST_MONTH",
            StaticDate::NextMonth => "NEXT_MONTH",
            StaticDate::ThisQuarter => "THIS_QUARTER",
            StaticDate::LastQuarter => "LAST_QUARTER",
            StaticDate::NextQuarter => "NEXT_QUARTER",
            StaticDate::ThisYear => "THIS_YEAR",
            StaticDate::LastYear => "LAST_YEAR",
            StaticDate::NextYear => "NEXT_YEAR",
            StaticDate::Last90Days => "LAST_90_DAYS",
            StaticDate::Next90Days => "NEXT_90_DAYS",
        }
    }
}

/// Macros written as `NAME:n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamicDate {
    LastNDays,
    NextNDays,
    LastNWeeks,
    NextNWeeks,
    LastNMonths,
    NextNMonths,
    LastNQuarters,
    NextNQuarters,
    LastNYears,
    NextNYears,
    NDaysAgo,
}

impl DynamicDate {
    pub fn from_name(name: &str) -> Option<Self> {
        let m = match name {
            "LAST_N_DAYS" => DynamicDate::LastNDays,
            "NEXT_N_DAYS" => DynamicDate::NextNDays,
            "LAST_N_WEEKS" => DynamicDate::LastNWeeks,
            "NEXT_N_WEEKS" => DynamicDate::NextNWeeks,
            "LAST_N_MONTHS" => DynamicDate::LastNMonths,
            "NEXT_N_MONTHS" => DynamicDate::NextNMonths,
            "LAST_N_QUARTERS" => DynamicDate::LastNQuarters,
            "NEXT_N_QUARTERS" => DynamicDate::NextNQuarters,
            "LAST_N_YEARS" => DynamicDate::LastNYears,
            "NEXT_N_YEARS" => DynamicDate::NextNYears,
            "N_DAYS_AGO" => DynamicDate::NDaysAgo,
            _ => return None,
        };
        Some(m)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DynamicDate::LastNDays => "LAST_N_DAYS",
            DynamicDate::NextNDays => "NEXT_N_DAYS",
            DynamicDate::LastNWeeks => "LAST_N_WEEKS",
            DynamicDate::NextNWeeks => "NEXT_N_WEEKS",
            DynamicDate::LastNMonths => "LAST_N_MONTHS",
            DynamicDate::NextNMonths => "NEXT_N_MONTHS",
            DynamicDate::LastNQuarters => "LAST_N_QUARTERS",
            DynamicDate::NextNQuarters => "NEXT_N_QUARTERS",
            DynamicDate::LastNYears => "LAST_N_YEARS",
            DynamicDate::NextNYears => "NEXT_N_YEARS",
            DynamicDate::NDaysAgo => "N_DAYS_AGO",
        }
    }
}

/// A date macro as written in the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateMacro {
    Static(StaticDate),
    Dynamic(DynamicDate, u32),
}

impl fmt::Display for DateMacro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateMacro::Static(m) => f.write_str(m.as_str()),
            DateMacro::Dynamic(m, n) => write!(f, "{}:{}", m.as_str(), n),
        }
    }
}

impl Serialize for DateMacro {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Turns macros into instants at execution time.
pub trait DateResolver: Send + Sync {
    fn resolve_static(&self, ctx: &QueryContext, m: StaticDate) -> QueryResult<DateTime<Utc>>;

    fn resolve_dynamic(&self, ctx: &QueryContext, m: DynamicDate, n: u32) -> QueryResult<DateTime<Utc>>;

    fn resolve(&self, ctx: &QueryContext, m: &DateMacro) -> QueryResult<DateTime<Utc>> {
        match *m {
            DateMacro::Static(s) => self.resolve_static(ctx, s),
            DateMacro::Dynamic(d, n) => self.resolve_dynamic(ctx, d, n),
        }
    }
}

/// Gregorian calendar resolver working in the request's timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalendarDateResolver {
    fixed_now: Option<DateTime<Utc>>,
}

impl CalendarDateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver pinned to a fixed instant.
    pub fn fixed(now: DateTime<Utc>) -> Self {
        Self {
            fixed_now: Some(now),
        }
    }

    fn today(&self, ctx: &QueryContext) -> NaiveDate {
        let now = self.fixed_now.unwrap_or_else(Utc::now);
        now.with_timezone(&ctx.timezone).date_naive()
    }

    fn start_of_day(&self, ctx: &QueryContext, date: NaiveDate) -> QueryResult<DateTime<Utc>> {
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| out_of_range(date))?;
        let local = ctx.timezone.from_local_datetime(&midnight);
        // Midnight may fall into a DST gap; take the first valid instant.
        let resolved = local
            .earliest()
            .or_else(|| local.latest())
            .or_else(|| {
                ctx.timezone
                    .from_local_datetime(&(midnight + Duration::hours(1)))
                    .earliest()
            })
            .ok_or_else(|| out_of_range(date))?;
        Ok(resolved.with_timezone(&Utc))
    }
}

impl DateResolver for CalendarDateResolver {
    fn resolve_static(&self, ctx: &QueryContext, m: StaticDate) -> QueryResult<DateTime<Utc>> {
        let today = self.today(ctx);
        let date = match m {
            StaticDate::Today => Some(today),
            StaticDate::Yesterday => shift_days(today, -1),
            StaticDate::Tomorrow => shift_days(today, 1),
            StaticDate::ThisWeek => Some(week_start(today)),
            StaticDate::LastWeek => shift_days(week_start(today), -7),
            StaticDate::NextWeek => shift_days(week_start(today), 14),
            StaticDate::ThisMonth => month_start(today),
            StaticDate::LastMonth => month_start(today).and_then(|d| shift_months(d, -1)),
            StaticDate::NextMonth => month_start(today).and_then(|d| shift_months(d, 2)),
            StaticDate::ThisQuarter => quarter_start(today),
            StaticDate::LastQuarter => quarter_start(today).and_then(|d| shift_months(d, -3)),
            StaticDate::NextQuarter => quarter_start(today).and_then(|d| shift_months(d, 6)),
            StaticDate::ThisYear => year_start(today),
            StaticDate::LastYear => year_start(today).and_then(|d| shift_months(d, -12)),
            StaticDate::NextYear => year_start(today).and_then(|d| shift_months(d, 24)),
            StaticDate::Last90Days => shift_days(today, -90),
            StaticDate::Next90Days => shift_days(today, 91),
        };
        let date = date.ok_or_else(|| out_of_range(today))?;
        self.start_of_day(ctx, date)
    }

    fn resolve_dynamic(&self, ctx: &QueryContext, m: DynamicDate, n: u32) -> QueryResult<DateTime<Utc>> {
        let today = self.today(ctx);
        let n = i64::from(n);
        let date = match m {
            DynamicDate::LastNDays | DynamicDate::NDaysAgo => shift_days(today, -n),
            DynamicDate::NextNDays => shift_days(today, n + 1),
            DynamicDate::LastNWeeks => shift_days(week_start(today), -7 * n),
            DynamicDate::NextNWeeks => shift_days(week_start(today), 7 * (n + 1)),
            DynamicDate::LastNMonths => month_start(today).and_then(|d| shift_months(d, -n)),
            DynamicDate::NextNMonths => month_start(today).and_then(|d| shift_months(d, n + 1)),
            DynamicDate::LastNQuarters => {
                quarter_start(today).and_then(|d| shift_months(d, -3 * n))
            }
            DynamicDate::NextNQuarters => {
                quarter_start(today).and_then(|d| shift_months(d, 3 * (n + 1)))
            }
            DynamicDate::LastNYears => year_start(today).and_then(|d| shift_months(d, -12 * n)),
            DynamicDate::NextNYears => {
                year_start(today).and_then(|d| shift_months(d, 12 * (n + 1)))
            }
        };
        let date = date.ok_or_else(|| out_of_range(today))?;
        self.start_of_day(ctx, date)
    }
}

fn out_of_range(date: NaiveDate) -> QueryError {
    QueryError::Provider(format!("Date macro out of range near {}", date))
}

fn shift_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(Duration::try_days(days)?)
}

fn shift_months(date: NaiveDate, months: i64) -> Option<NaiveDate> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        date.checked_add_months(magnitude)
    } else {
        date.checked_sub_months(magnitude)
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn month_start(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
}

fn quarter_start(date: NaiveDate) -> Option<NaiveDate> {
    let month = (date.month() - 1) / 3 * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1)
}

fn year_start(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), 1, 1)
}
