use chrono::{NaiveDate, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{DeliverySlot, ExternalOrder};

pub const DELIVERY_DATE_KEY: &str = "Delivery Date";
pub const TIME_SLOT_KEY: &str = "Time Slot";

const DATE_FORMATS: &[&str] = &["%d %B %Y", "%B %d %Y", "%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];

static CLOCK_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}:\d{2}(?::\d{2})?").expect("valid clock regex"));

/// Reads the delivery slot from order metadata. All of date, start and
/// duration must parse or there is no slot.
pub fn parse_delivery_slot(order: &ExternalOrder) -> Option<DeliverySlot> {
    let date = parse_date(order.meta_value(DELIVERY_DATE_KEY)?)?;
    let (time_from, duration_minutes) = parse_time_slot(order.meta_value(TIME_SLOT_KEY)?)?;
    Some(DeliverySlot {
        date,
        time_from,
        duration_minutes,
    })
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

/// "HH:MM - HH:MM" with dash variants or " to "; returns start and length in
/// minutes, wrapping past midnight.
pub fn parse_time_slot(raw: &str) -> Option<(NaiveTime, u32)> {
    let mut times = CLOCK_TIME.find_iter(raw).map(|m| parse_clock(m.as_str()));
    let start = times.next()??;
    let end = times.next()??;

    let mut seconds = end.num_seconds_from_midnight() as i64 - start.num_seconds_from_midnight() as i64;
    if seconds < 0 {
        seconds += 24 * 3600;
    }
    let minutes = ((seconds as f64) / 60.0).round() as u32;
    Some((start, minutes.max(1)))
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let fmt = if raw.matches(':').count() == 2 {
        "%H:%M:%S"
    } else {
        "%H:%M"
    };
    NaiveTime::parse_from_str(raw, fmt)
        .ok()
        .and_then(|t| t.with_nanosecond(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("5 March 2024")]
    #[case("5 March, 2024")]
    #[case("March 5, 2024")]
    #[case("2024-03-05")]
    #[case("05/03/2024")]
    fn accepts_common_date_formats(#[case] raw: &str) {
        assert_eq!(parse_date(raw), NaiveDate::from_ymd_opt(2024, 3, 5));
    }

    #[test]
    fn us_dates_parse_when_day_first_is_impossible() {
        assert_eq!(parse_date("03/25/2024"), NaiveDate::from_ymd_opt(2024, 3, 25));
        assert_eq!(parse_date("someday"), None);
    }

    #[rstest]
    #[case("14:00 - 16:00", 14, 120)]
    #[case("9:30–11:00", 9, 90)]
    #[case("18:00 to 20:30", 18, 150)]
    #[case("23:00 - 01:00", 23, 120)]
    fn time_slots_yield_start_and_duration(
        #[case] raw: &str,
        #[case] hour: u32,
        #[case] minutes: u32,
    ) {
        let (start, duration) = parse_time_slot(raw).unwrap();
        assert_eq!(start.hour(), hour);
        assert_eq!(duration, minutes);
    }

    #[test]
    fn half_a_slot_is_no_slot() {
        assert_eq!(parse_time_slot("after 14:00"), None);
        assert_eq!(parse_time_slot("25:00 - 26:00"), None);
    }
}
