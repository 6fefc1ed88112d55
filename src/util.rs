//! Shared numeric and calendar helpers.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;

/// Round to exchange tick precision (two decimal places).
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Absolute percentage change of `new` relative to `reference`.
pub fn percentage_change(reference: Decimal, new: Decimal) -> Decimal {
    if reference.is_zero() {
        return Decimal::ZERO;
    }
    ((reference - new).abs() / reference.abs()) * Decimal::ONE_HUNDRED
}

/// Premium skew between the two legs of a straddle, as a rounded percentage
/// of the cheaper leg.
pub fn skew_percent(a: Decimal, b: Decimal) -> Decimal {
    let min = a.min(b);
    if min.is_zero() {
        return Decimal::ZERO;
    }
    ((a - b).abs() / min * Decimal::ONE_HUNDRED).round()
}

/// Most recent weekday on or before `now`, for indicator candle windows.
/// Exchange holidays are not modelled; a holiday start only widens the window.
pub fn last_open_date_since(now: DateTime<Utc>) -> NaiveDate {
    let mut date = now.date_naive();
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date -= Duration::days(1);
    }
    date
}

/// Start of the most recent fully closed candle of `interval_minutes`.
pub fn nearest_closed_candle_time(now: DateTime<Utc>, interval_minutes: i64) -> DateTime<Utc> {
    let interval_secs = interval_minutes * 60;
    let ts = now.timestamp();
    let floored = ts - ts.rem_euclid(interval_secs);
    DateTime::from_timestamp(floored, 0).unwrap_or(now)
}
