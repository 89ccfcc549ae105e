//! Business-hours calendar.
//!
//! Decides whether a tenant is "open" at a given instant from a weekly
//! schedule, a holiday list and an IANA timezone. Open/close bounds are
//! compared as `HHMM` integers over the half-open interval `[open, close)`,
//! so `24:00` may be used as a closing time. Windows never span midnight.

use super::ivr_config::IvrConfigError;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A wall-clock time of day stored as `hour * 100 + minute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime(0);
    pub const END_OF_DAY: ClockTime = ClockTime(2400);

    pub fn new(hour: u32, minute: u32) -> Result<Self, IvrConfigError> {
        if minute > 59 || hour > 24 || (hour == 24 && minute != 0) {
            return Err(IvrConfigError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self((hour * 100 + minute) as u16))
    }

    pub fn hhmm(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 100
    }

    pub fn minute(self) -> u16 {
        self.0 % 100
    }

    fn of_local(hour: u32, minute: u32) -> Self {
        Self((hour * 100 + minute) as u16)
    }
}

impl FromStr for ClockTime {
    type Err = IvrConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || IvrConfigError::InvalidTime(value.to_string());
        let mut parts = value.trim().split(':');
        let hour = parts.next().ok_or_else(invalid)?;
        let minute = parts.next().ok_or_else(invalid)?;
        // seconds are tolerated but must be zero
        if let Some(seconds) = parts.next() {
            if seconds != "00" || parts.next().is_some() {
                return Err(invalid());
            }
        }
        if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            return Err(invalid());
        }
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl TryFrom<String> for ClockTime {
    type Error = IvrConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub open: ClockTime,
    pub close: ClockTime,
}

impl DaySchedule {
    pub fn new(open: ClockTime, close: ClockTime) -> Self {
        Self {
            enabled: true,
            open,
            close,
        }
    }

    pub fn closed() -> Self {
        Self {
            enabled: false,
            open: ClockTime::MIDNIGHT,
            close: ClockTime::MIDNIGHT,
        }
    }

    pub fn contains(&self, time: ClockTime) -> bool {
        self.enabled && self.open <= time && time < self.close
    }
}

/// One optional [`DaySchedule`] per weekday. A missing day is closed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeekSchedule {
    #[serde(default)]
    pub monday: Option<DaySchedule>,
    #[serde(default)]
    pub tuesday: Option<DaySchedule>,
    #[serde(default)]
    pub wednesday: Option<DaySchedule>,
    #[serde(default)]
    pub thursday: Option<DaySchedule>,
    #[serde(default)]
    pub friday: Option<DaySchedule>,
    #[serde(default)]
    pub saturday: Option<DaySchedule>,
    #[serde(default)]
    pub sunday: Option<DaySchedule>,
}

impl WeekSchedule {
    /// Monday to Friday share `schedule`, the weekend is closed.
    pub fn weekdays(schedule: DaySchedule) -> Self {
        Self {
            monday: Some(schedule.clone()),
            tuesday: Some(schedule.clone()),
            wednesday: Some(schedule.clone()),
            thursday: Some(schedule.clone()),
            friday: Some(schedule),
            saturday: Some(DaySchedule::closed()),
            sunday: Some(DaySchedule::closed()),
        }
    }

    pub fn every_day(schedule: DaySchedule) -> Self {
        let mut week = Self::weekdays(schedule.clone());
        week.saturday = Some(schedule.clone());
        week.sunday = Some(schedule);
        week
    }

    pub fn get(&self, weekday: Weekday) -> Option<&DaySchedule> {
        match weekday {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }

    pub fn set(&mut self, weekday: Weekday, schedule: Option<DaySchedule>) {
        let slot = match weekday {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        };
        *slot = schedule;
    }

    fn iter(&self) -> impl Iterator<Item = (Weekday, &DaySchedule)> {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .filter_map(move |day| self.get(day).map(|schedule| (day, schedule)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHoursConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub timezone: Tz,
    #[serde(default)]
    pub week_schedule: WeekSchedule,
    #[serde(default)]
    pub holidays: BTreeSet<NaiveDate>,
}

impl BusinessHoursConfig {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        is_open(self, now)
    }

    pub fn validate(&self) -> Result<(), IvrConfigError> {
        for (day, schedule) in self.week_schedule.iter() {
            if schedule.enabled && schedule.open >= schedule.close {
                return Err(IvrConfigError::EmptyWindow {
                    day: day.to_string(),
                    open: schedule.open,
                    close: schedule.close,
                });
            }
        }
        Ok(())
    }
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: Tz::America__New_York,
            week_schedule: WeekSchedule::weekdays(DaySchedule::new(
                ClockTime(900),
                ClockTime(1700),
            )),
            holidays: BTreeSet::new(),
        }
    }
}

/// Whether business hours are in effect at `now`.
pub fn is_open(config: &BusinessHoursConfig, now: DateTime<Utc>) -> bool {
    if !config.enabled {
        return true;
    }

    let local = now.with_timezone(&config.timezone);
    if config.holidays.contains(&local.date_naive()) {
        return false;
    }

    let Some(schedule) = config.week_schedule.get(local.weekday()) else {
        return false;
    };
    schedule.contains(ClockTime::of_local(local.hour(), local.minute()))
}

fn default_true() -> bool {
    true
}
