//! Dawn/dusk computation for a configured city.
//!
//! Uses the NOAA sunrise equation with a 6° solar depression (civil
//! twilight).  Accuracy is within a couple of minutes, which is plenty for
//! switching porch lights.  Every instant leaves this module as
//! `DateTime<Utc>`; the timezone is only used to decide which local calendar
//! day "today" is and to place the fallback time.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::error;

/// Solar depression angle (degrees below the horizon) for civil twilight.
const CIVIL_DEPRESSION_DEG: f64 = 6.0;

/// Julian day of the J2000.0 epoch (2000-01-01 12:00 UTC).
const J2000: f64 = 2_451_545.0;

/// Julian day of the unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Obliquity of the ecliptic.
const EARTH_TILT_DEG: f64 = 23.4397;

/// Days searched ahead before giving up (polar day / polar night).
const MAX_SEARCH_DAYS: i64 = 7;

/// Local clock time used when no solar event can be computed.
const FALLBACK_HOUR: u32 = 17;

// ---------------------------------------------------------------------------
// City table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct City {
    pub name: &'static str,
    pub latitude: f64,
    /// Degrees east of Greenwich (west is negative).
    pub longitude: f64,
    pub timezone: &'static str,
}

const fn city(name: &'static str, latitude: f64, longitude: f64, timezone: &'static str) -> City {
    City {
        name,
        latitude,
        longitude,
        timezone,
    }
}

static CITIES: &[City] = &[
    city("Amsterdam", 52.37, 4.89, "Europe/Amsterdam"),
    city("Athens", 37.98, 23.73, "Europe/Athens"),
    city("Atlanta", 33.75, -84.39, "America/New_York"),
    city("Auckland", -36.85, 174.76, "Pacific/Auckland"),
    city("Berlin", 52.52, 13.40, "Europe/Berlin"),
    city("Boston", 42.36, -71.06, "America/New_York"),
    city("Calgary", 51.05, -114.07, "America/Edmonton"),
    city("Chicago", 41.88, -87.63, "America/Chicago"),
    city("Dallas", 32.78, -96.80, "America/Chicago"),
    city("Denver", 39.74, -104.99, "America/Denver"),
    city("Detroit", 42.33, -83.05, "America/Detroit"),
    city("Dublin", 53.35, -6.26, "Europe/Dublin"),
    city("Edmonton", 53.55, -113.49, "America/Edmonton"),
    city("Grand Rapids", 42.96, -85.67, "America/Detroit"),
    city("Halifax", 44.65, -63.58, "America/Halifax"),
    city("Helsinki", 60.17, 24.94, "Europe/Helsinki"),
    city("Honolulu", 21.31, -157.86, "Pacific/Honolulu"),
    city("Houston", 29.76, -95.37, "America/Chicago"),
    city("Lisbon", 38.72, -9.14, "Europe/Lisbon"),
    city("London", 51.51, -0.13, "Europe/London"),
    city("Los Angeles", 34.05, -118.24, "America/Los_Angeles"),
    city("Madrid", 40.42, -3.70, "Europe/Madrid"),
    city("Melbourne", -37.81, 144.96, "Australia/Melbourne"),
    city("Mexico City", 19.43, -99.13, "America/Mexico_City"),
    city("Miami", 25.76, -80.19, "America/New_York"),
    city("Minneapolis", 44.98, -93.27, "America/Chicago"),
    city("Montreal", 45.50, -73.57, "America/Toronto"),
    city("New York", 40.71, -74.01, "America/New_York"),
    city("Oslo", 59.91, 10.75, "Europe/Oslo"),
    city("Ottawa", 45.42, -75.70, "America/Toronto"),
    city("Paris", 48.86, 2.35, "Europe/Paris"),
    city("Phoenix", 33.45, -112.07, "America/Phoenix"),
    city("Rome", 41.90, 12.50, "Europe/Rome"),
    city("San Francisco", 37.77, -122.42, "America/Los_Angeles"),
    city("Seattle", 47.61, -122.33, "America/Los_Angeles"),
    city("Singapore", 1.35, 103.82, "Asia/Singapore"),
    city("Stockholm", 59.33, 18.07, "Europe/Stockholm"),
    city("Sydney", -33.87, 151.21, "Australia/Sydney"),
    city("Tokyo", 35.68, 139.69, "Asia/Tokyo"),
    city("Toronto", 43.65, -79.38, "America/Toronto"),
    city("Tromso", 69.65, 18.96, "Europe/Oslo"),
    city("Vancouver", 49.28, -123.12, "America/Vancouver"),
    city("Washington", 38.91, -77.04, "America/New_York"),
    city("Winnipeg", 49.90, -97.14, "America/Winnipeg"),
];

/// Case-insensitive lookup in the built-in city table.
pub fn lookup_city(name: &str) -> Option<&'static City> {
    let name = name.trim();
    CITIES.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

impl City {
    pub fn tz(&self) -> Option<Tz> {
        self.timezone.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// Local clock helpers
// ---------------------------------------------------------------------------

/// Resolve a local wall-clock time on `date` in `tz` to a UTC instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// DST gap are pushed forward one hour.
pub fn at_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt.with_timezone(&Utc);
    }
    let shifted = naive + Duration::hours(1);
    match tz.from_local_datetime(&shifted).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

/// Local calendar date of `now` in `tz`.
pub fn local_date(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

// ---------------------------------------------------------------------------
// Solar clock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Dawn,
    Dusk,
}

#[derive(Debug, Clone)]
pub struct SolarClock {
    location: String,
    city: Option<&'static City>,
    tz: Tz,
}

impl SolarClock {
    /// `tz` is the zone used for local dates and the fallback time.  An
    /// unknown `location` is logged once here and again on each lookup.
    pub fn new(location: &str, tz: Tz) -> Self {
        let city = lookup_city(location);
        if city.is_none() {
            error!(city = %location, "unrecognized city, dusk/dawn will default to 17:00");
        }
        Self {
            location: location.to_string(),
            city,
            tz,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_known(&self) -> bool {
        self.city.is_some()
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Next civil dusk strictly after `now`, or today 17:00 local when the
    /// city is unknown.
    pub fn next_dusk(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.next_event(Event::Dusk, now)
    }

    /// Next civil dawn strictly after `now`, or today 17:00 local when the
    /// city is unknown.
    pub fn next_dawn(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.next_event(Event::Dawn, now)
    }

    /// Today 17:00 in the clock's timezone.
    pub fn fallback(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(FALLBACK_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);
        at_local(self.tz, local_date(self.tz, now), time)
    }

    fn next_event(&self, event: Event, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(city) = self.city else {
            error!(city = %self.location, ?event, "unrecognized city, using default time of 17:00");
            return self.fallback(now);
        };

        let today = local_date(self.tz, now);
        for offset in 0..=MAX_SEARCH_DAYS {
            let date = today + Duration::days(offset);
            let Some((dawn, dusk)) = twilight(date, city.latitude, city.longitude) else {
                continue;
            };
            let at = match event {
                Event::Dawn => dawn,
                Event::Dusk => dusk,
            };
            if at > now {
                return at;
            }
        }

        error!(city = %city.name, ?event, "no civil twilight in the coming week, using 17:00");
        self.fallback(now)
    }
}

// ---------------------------------------------------------------------------
// Sunrise equation
// ---------------------------------------------------------------------------

/// Civil dawn and dusk on the given calendar date, or `None` when the sun
/// never crosses the twilight elevation that day.
fn twilight(date: NaiveDate, latitude: f64, longitude: f64) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    let days_since_epoch = midnight.timestamp().div_euclid(86_400) as f64;
    let n = (UNIX_EPOCH_JD + days_since_epoch + 0.5 - J2000).round();

    // Mean solar noon
    let j_star = n - longitude / 360.0;

    let m = (357.5291 + 0.985_600_28 * j_star).rem_euclid(360.0).to_radians();
    let center = 1.9148 * m.sin() + 0.0200 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
    let lambda = (m.to_degrees() + center + 180.0 + 102.9372)
        .rem_euclid(360.0)
        .to_radians();

    let j_transit = J2000 + j_star + 0.0053 * m.sin() - 0.0069 * (2.0 * lambda).sin();

    let sin_decl = lambda.sin() * EARTH_TILT_DEG.to_radians().sin();
    let cos_decl = (1.0 - sin_decl * sin_decl).sqrt();
    let phi = latitude.to_radians();

    let cos_hour_angle = ((-CIVIL_DEPRESSION_DEG).to_radians().sin() - phi.sin() * sin_decl)
        / (phi.cos() * cos_decl);
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return None;
    }
    let hour_angle = cos_hour_angle.acos().to_degrees();

    let dawn = julian_to_utc(j_transit - hour_angle / 360.0)?;
    let dusk = julian_to_utc(j_transit + hour_angle / 360.0)?;
    Some((dawn, dusk))
}

fn julian_to_utc(jd: f64) -> Option<DateTime<Utc>> {
    let secs = ((jd - UNIX_EPOCH_JD) * 86_400.0).round() as i64;
    DateTime::from_timestamp(secs, 0)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn detroit() -> SolarClock {
        SolarClock::new("Detroit", chrono_tz::America::Detroit)
    }

    fn local(tz: Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        tz.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn minutes_of_day(tz: Tz, t: DateTime<Utc>) -> u32 {
        let l = t.with_timezone(&tz);
        l.hour() * 60 + l.minute()
    }

    #[test]
    fn every_city_timezone_parses() {
        for c in CITIES {
            assert!(c.tz().is_some(), "bad timezone for {}", c.name);
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup_city("detroit").map(|c| c.name), Some("Detroit"));
        assert_eq!(lookup_city("  GRAND RAPIDS ").map(|c| c.name), Some("Grand Rapids"));
        assert!(lookup_city("Atlantis").is_none());
    }

    #[test]
    fn detroit_summer_solstice_dusk() {
        let tz = chrono_tz::America::Detroit;
        let now = local(tz, 2024, 6, 21, 12, 0);
        let dusk = detroit().next_dusk(now);
        assert_eq!(dusk.with_timezone(&tz).date_naive(), now.with_timezone(&tz).date_naive());
        // Published civil dusk is 21:47 EDT.
        let m = minutes_of_day(tz, dusk);
        assert!((21 * 60 + 40..=21 * 60 + 55).contains(&m), "dusk at {m} minutes");
    }

    #[test]
    fn detroit_summer_solstice_dawn() {
        let tz = chrono_tz::America::Detroit;
        let now = local(tz, 2024, 6, 21, 1, 0);
        let dawn = detroit().next_dawn(now);
        // Published civil dawn is 05:24 EDT.
        let m = minutes_of_day(tz, dawn);
        assert!((5 * 60 + 15..=5 * 60 + 30).contains(&m), "dawn at {m} minutes");
    }

    #[test]
    fn london_winter_dusk() {
        let tz = chrono_tz::Europe::London;
        let clock = SolarClock::new("London", tz);
        let now = local(tz, 2024, 12, 21, 9, 0);
        let dusk = clock.next_dusk(now);
        // Civil dusk around 16:35 GMT.
        let m = minutes_of_day(tz, dusk);
        assert!((16 * 60 + 25..=16 * 60 + 45).contains(&m), "dusk at {m} minutes");
    }

    #[test]
    fn sydney_dusk_is_on_local_date() {
        let tz = chrono_tz::Australia::Sydney;
        let clock = SolarClock::new("Sydney", tz);
        let now = local(tz, 2024, 1, 10, 8, 0);
        let dusk = clock.next_dusk(now);
        assert_eq!(
            dusk.with_timezone(&tz).date_naive(),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
        );
        let m = minutes_of_day(tz, dusk);
        // Summer civil dusk is roughly 20:30 AEDT.
        assert!((20 * 60 + 10..=20 * 60 + 50).contains(&m), "dusk at {m} minutes");
    }

    #[test]
    fn dusk_already_passed_rolls_to_tomorrow() {
        let tz = chrono_tz::America::Detroit;
        let now = local(tz, 2024, 6, 21, 23, 0);
        let dusk = detroit().next_dusk(now);
        assert!(dusk > now);
        assert_eq!(
            dusk.with_timezone(&tz).date_naive(),
            NaiveDate::from_ymd_opt(2024, 6, 22).unwrap()
        );
    }

    #[test]
    fn dawn_already_passed_rolls_to_tomorrow() {
        let tz = chrono_tz::America::Detroit;
        let now = local(tz, 2024, 6, 21, 8, 0);
        let dawn = detroit().next_dawn(now);
        assert!(dawn > now);
        assert_eq!(
            dawn.with_timezone(&tz).date_naive(),
            NaiveDate::from_ymd_opt(2024, 6, 22).unwrap()
        );
    }

    #[test]
    fn dawn_and_dusk_are_independent() {
        let tz = chrono_tz::America::Detroit;
        let now = local(tz, 2024, 3, 20, 12, 0);
        let clock = detroit();
        let dusk = clock.next_dusk(now);
        let dawn = clock.next_dawn(now);
        assert!(dawn > dusk, "next dawn must be the following morning");
        assert!(dawn - dusk < Duration::hours(12));
    }

    #[test]
    fn unknown_city_falls_back_to_five_pm_today() {
        let tz = chrono_tz::America::Detroit;
        let clock = SolarClock::new("UnknownCity", tz);
        assert!(!clock.is_known());
        let expected = local(tz, 2024, 6, 21, 17, 0);
        for hour in [0, 9, 17, 19, 23] {
            let now = local(tz, 2024, 6, 21, hour, 30);
            assert_eq!(clock.next_dusk(now), expected);
            assert_eq!(clock.next_dawn(now), expected);
        }
    }

    #[test]
    fn polar_summer_falls_back() {
        let tz = chrono_tz::Europe::Oslo;
        let clock = SolarClock::new("Tromso", tz);
        let now = local(tz, 2024, 6, 21, 12, 0);
        assert_eq!(clock.next_dusk(now), local(tz, 2024, 6, 21, 17, 0));
    }

    #[test]
    fn at_local_handles_dst_gap() {
        let tz = chrono_tz::America::Detroit;
        // 02:30 does not exist on 2024-03-10.
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let t = at_local(tz, date, NaiveTime::from_hms_opt(2, 30, 0).unwrap());
        assert_eq!(minutes_of_day(tz, t), 3 * 60 + 30);
    }
}
