use chrono::{Datelike, Duration, NaiveDate};
use hourglass_rs::SafeTimeProvider;

/// current calendar date from the injected clock
pub fn today(time_provider: &SafeTimeProvider) -> NaiveDate {
    time_provider.now().date_naive()
}

/// first day of the month containing `d`
pub fn first_day(d: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(d.year(), d.month(), 1).expect("first of month is always valid")
}

/// last day of the month containing `d`
pub fn last_day(d: NaiveDate) -> NaiveDate {
    let (year, month) = if d.month() == 12 {
        (d.year() + 1, 1)
    } else {
        (d.year(), d.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is always valid")
        - Duration::days(1)
}

/// number of days in the month containing `d`
pub fn days_in_month(d: NaiveDate) -> u32 {
    last_day(d).day()
}

/// add `n` calendar months, clamping the day to the shorter month
pub fn add_months(d: NaiveDate, n: i32) -> NaiveDate {
    let total = d.year() * 12 + d.month() as i32 - 1 + n;
    let year = total.div_euclid(12);
    let month = (total.rem_euclid(12) + 1) as u32;

    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is always valid");
    let day = d.day().min(last_day(first).day());
    NaiveDate::from_ymd_opt(year, month, day).expect("clamped day is always valid")
}

/// closed interval [first_day, last_day] of the month containing `d`
pub fn enclosing_month(d: NaiveDate) -> (NaiveDate, NaiveDate) {
    (first_day(d), last_day(d))
}
