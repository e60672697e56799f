//! Serial date conversion
//!
//! Spreadsheet cells store instants as fractional day counts relative to the
//! workbook epoch. Under the 1900 system serial 1 is 1900-01-01 and the
//! legacy nonexistent leap day 1900-02-29 occupies serial 60, so serials
//! from 61 on are plain day counts from 1899-12-30. Under the 1904 system
//! serial 0 is 1904-01-01.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Which serial-day epoch a workbook uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateEpoch {
    /// 1900 date system, serial 1 = 1900-01-01 (the default)
    #[default]
    Date1900,
    /// 1904 date system, serial 0 = 1904-01-01
    Date1904,
}

fn base_1900() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap()
}

fn base_1904() -> NaiveDate {
    NaiveDate::from_ymd_opt(1904, 1, 1).unwrap()
}

// First calendar day on which 1900-system serials are unambiguous.
fn post_leap_cutover() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 3, 1).unwrap()
}

/// Convert an instant to a serial day number under the given epoch.
///
/// The fractional part carries the time of day at millisecond resolution.
pub fn datetime_to_serial(instant: NaiveDateTime, epoch: DateEpoch) -> f64 {
    let date = instant.date();
    let days = match epoch {
        DateEpoch::Date1904 => (date - base_1904()).num_days(),
        DateEpoch::Date1900 => {
            if date >= post_leap_cutover() {
                (date - base_1900()).num_days()
            } else {
                // Pre-cutover serials count from 1899-12-31 so that
                // serial 1 lands on 1900-01-01.
                (date - base_1900()).num_days() - 1
            }
        }
    };
    let millis = (instant.time().num_seconds_from_midnight() as f64) * 1000.0
        + (instant.time().nanosecond() as f64 / 1_000_000.0).round();
    days as f64 + millis / MILLIS_PER_DAY
}

/// Convert a serial day number back to an instant under the given epoch.
///
/// Returns `None` when the serial is out of the representable calendar
/// range. Time of day is rounded to whole milliseconds.
pub fn serial_to_datetime(serial: f64, epoch: DateEpoch) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let mut days = serial.floor() as i64;
    let mut millis = ((serial - serial.floor()) * MILLIS_PER_DAY).round() as i64;
    if millis >= MILLIS_PER_DAY as i64 {
        days += 1;
        millis = 0;
    }

    let base = match epoch {
        DateEpoch::Date1904 => base_1904(),
        // Serials below 61 predate the phantom leap day and count from
        // 1899-12-31; serial 60 collapses onto 1900-03-01.
        DateEpoch::Date1900 if days < 61 => base_1900().succ_opt()?,
        DateEpoch::Date1900 => base_1900(),
    };

    let date = base.checked_add_signed(Duration::days(days))?;
    let time = date.and_hms_opt(0, 0, 0)?;
    Some(time + Duration::milliseconds(millis))
}
