use crate::config::PipelineConfig;
use crate::types::{SarError, SarResult};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Months composited by the summer series (June, July, August)
pub const SUMMER_MONTHS: [u32; 3] = [6, 7, 8];

/// Periodicity used to partition the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One window per calendar year
    Annual,
    /// One window per calendar month
    Monthly,
    /// One window per summer month, sparse over the year
    Summer,
}

impl Granularity {
    pub fn name(&self) -> &'static str {
        match self {
            Granularity::Annual => "annual",
            Granularity::Monthly => "monthly",
            Granularity::Summer => "summer",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Season tag carried by summer windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Summer,
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Season::Summer => write!(f, "summer"),
        }
    }
}

/// Half-open date interval `[start, end)` tagged with its period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    /// Exclusive end date
    pub end: NaiveDate,
    pub year: i32,
    pub month: Option<u32>,
    pub season: Option<Season>,
}

impl TimeWindow {
    /// True if the instant falls on a day inside the window
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let day = instant.date_naive();
        day >= self.start && day < self.end
    }

    /// Last day covered by the window (inclusive)
    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.start)
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::MIN).and_utc()
    }

    /// Window start as epoch milliseconds
    pub fn time_start_millis(&self) -> i64 {
        self.start_instant().timestamp_millis()
    }

    /// Human-readable period label, e.g. `2020`, `2020-06`, `2020-06 summer`
    pub fn label(&self) -> String {
        let mut label = match self.month {
            Some(month) => format!("{}-{:02}", self.year, month),
            None => self.year.to_string(),
        };
        if let Some(season) = self.season {
            label.push(' ');
            label.push_str(&season.to_string());
        }
        label
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}, {})", self.label(), self.start, self.end)
    }
}

/// Generates the ordered, non-overlapping windows of each granularity
#[derive(Debug, Clone)]
pub struct PeriodWindower {
    start_year: i32,
    end_year: i32,
    /// Exclusive clip bound, the day after the configured end date
    clip_end: NaiveDate,
}

impl PeriodWindower {
    /// Windower over `start_year..=end_year`, clipped after `end_date` if given
    pub fn new(start_year: i32, end_year: i32, end_date: Option<NaiveDate>) -> SarResult<Self> {
        if start_year > end_year {
            return Err(SarError::Config(format!(
                "start year {} is after end year {}",
                start_year, end_year
            )));
        }

        let last_day = match end_date {
            Some(date) if date.year() != end_year => {
                return Err(SarError::Config(format!(
                    "clip date {} must fall in end year {}",
                    date, end_year
                )))
            }
            Some(date) => date,
            None => ymd(end_year, 12, 31)?,
        };
        let clip_end = last_day.succ_opt().ok_or_else(|| {
            SarError::Config(format!("no date follows {}", last_day))
        })?;

        Ok(Self {
            start_year,
            end_year,
            clip_end,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> SarResult<Self> {
        Self::new(config.start_year, config.end_year, config.end_date)
    }

    /// Windows for one granularity, ascending by start
    pub fn windows(&self, granularity: Granularity) -> SarResult<Vec<TimeWindow>> {
        let windows = match granularity {
            Granularity::Annual => self.annual_windows()?,
            Granularity::Monthly => self.month_windows(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12], None)?,
            Granularity::Summer => self.month_windows(&SUMMER_MONTHS, Some(Season::Summer))?,
        };

        log::debug!("Generated {} {} window(s)", windows.len(), granularity);
        Ok(windows)
    }

    fn annual_windows(&self) -> SarResult<Vec<TimeWindow>> {
        let mut windows = Vec::new();
        for year in self.start_year..=self.end_year {
            let start = ymd(year, 1, 1)?;
            let end = ymd(year + 1, 1, 1)?;
            if let Some(window) = self.clipped(start, end, year, None, None) {
                windows.push(window);
            }
        }
        Ok(windows)
    }

    fn month_windows(&self, months: &[u32], season: Option<Season>) -> SarResult<Vec<TimeWindow>> {
        let mut windows = Vec::new();
        for year in self.start_year..=self.end_year {
            for &month in months {
                let start = ymd(year, month, 1)?;
                let end = first_of_next_month(year, month)?;
                if let Some(window) = self.clipped(start, end, year, Some(month), season) {
                    windows.push(window);
                }
            }
        }
        Ok(windows)
    }

    fn clipped(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        year: i32,
        month: Option<u32>,
        season: Option<Season>,
    ) -> Option<TimeWindow> {
        if start >= self.clip_end {
            return None;
        }
        Some(TimeWindow {
            start,
            end: end.min(self.clip_end),
            year,
            month,
            season,
        })
    }
}

fn ymd(year: i32, month: u32, day: u32) -> SarResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| SarError::Config(format!("invalid date {}-{:02}-{:02}", year, month, day)))
}

fn first_of_next_month(year: i32, month: u32) -> SarResult<NaiveDate> {
    if month == 12 {
        ymd(year + 1, 1, 1)
    } else {
        ymd(year, month + 1, 1)
    }
}
