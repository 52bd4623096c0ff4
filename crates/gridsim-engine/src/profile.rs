//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Daily load curve, seasonal factors, and the current system load factor."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::f64::consts::PI;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use rand::Rng;
use serde::Serialize;

use crate::simulators::gaussian;

pub const CURVE_POINTS: usize = 24;

const CURVE_MIN: f64 = 0.3;
const CURVE_MAX: f64 = 1.2;
const LOAD_FACTOR_MIN: f64 = 0.3;
const LOAD_FACTOR_MAX: f64 = 1.5;

/// 24-point daily demand shape sampled evenly over [0, 24] inclusive.
pub fn daily_load_curve() -> [f64; CURVE_POINTS] {
    let step = 24.0 / (CURVE_POINTS as f64 - 1.0);
    let mut curve = [0.0; CURVE_POINTS];
    for (index, point) in curve.iter_mut().enumerate() {
        let hour = index as f64 * step;
        let mut value = 0.6
            + 0.2 * (2.0 * PI * (hour - 6.0) / 24.0).sin()
            + 0.3 * (-(hour - 8.5).powi(2) / 8.0).exp()
            + 0.4 * (-(hour - 19.0).powi(2) / 8.0).exp();
        if (0.0..=6.0).contains(&hour) {
            // overnight trough
            value -= 0.2 * (-(hour - 3.0).powi(2) / 4.0).exp();
        }
        *point = value.clamp(CURVE_MIN, CURVE_MAX);
    }
    curve
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeasonalFactors {
    pub load: f64,
    pub solar: f64,
    pub wind: f64,
}

impl SeasonalFactors {
    pub fn for_day(day_of_year: u32) -> Self {
        let day = day_of_year as f64;
        Self {
            load: 1.0 + 0.15 * (2.0 * PI * (day - 180.0) / 365.0).cos(),
            solar: (0.8 + 0.4 * (2.0 * PI * (day - 80.0) / 365.0).sin()).max(0.2),
            wind: (0.9 + 0.3 * (2.0 * PI * (day - 30.0) / 365.0).cos()).max(0.3),
        }
    }

    pub fn neutral() -> Self {
        Self {
            load: 1.0,
            solar: 1.0,
            wind: 1.0,
        }
    }
}

/// Fractional hour of day with minute resolution.
pub fn fractional_hour(now: DateTime<Utc>) -> f64 {
    now.hour() as f64 + now.minute() as f64 / 60.0
}

/// Daily curve plus the seasonal triple for the current calendar day.
#[derive(Debug, Clone, Serialize)]
pub struct LoadProfile {
    curve: [f64; CURVE_POINTS],
    seasonal: SeasonalFactors,
    seasonal_enabled: bool,
    day: NaiveDate,
}

impl LoadProfile {
    pub fn new(daily_curve: bool, seasonal_variation: bool, now: DateTime<Utc>) -> Self {
        let curve = if daily_curve {
            daily_load_curve()
        } else {
            [1.0; CURVE_POINTS]
        };
        let day = now.date_naive();
        Self {
            curve,
            seasonal: seasonal_for(seasonal_variation, day),
            seasonal_enabled: seasonal_variation,
            day,
        }
    }

    pub fn curve(&self) -> &[f64; CURVE_POINTS] {
        &self.curve
    }

    pub fn seasonal(&self) -> SeasonalFactors {
        self.seasonal
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Recomputes the seasonal factors when the calendar day changed.
    pub fn roll_to(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today == self.day {
            return false;
        }
        self.day = today;
        self.seasonal = seasonal_for(self.seasonal_enabled, today);
        true
    }

    /// Interpolated curve value times the seasonal load factor, without jitter.
    pub fn base_factor(&self, now: DateTime<Utc>) -> f64 {
        let hour = fractional_hour(now);
        let index = (hour.floor() as usize).min(CURVE_POINTS - 1);
        let next = (index + 1) % CURVE_POINTS;
        let fraction = hour - index as f64;
        let interpolated = self.curve[index] * (1.0 - fraction) + self.curve[next] * fraction;
        interpolated * self.seasonal.load
    }

    pub fn load_factor<R: Rng + ?Sized>(
        &self,
        now: DateTime<Utc>,
        jitter_sigma: f64,
        rng: &mut R,
    ) -> f64 {
        let jittered = self.base_factor(now) * (1.0 + gaussian(rng, jitter_sigma));
        jittered.clamp(LOAD_FACTOR_MIN, LOAD_FACTOR_MAX)
    }
}

fn seasonal_for(enabled: bool, day: NaiveDate) -> SeasonalFactors {
    if enabled {
        SeasonalFactors::for_day(day.ordinal())
    } else {
        SeasonalFactors::neutral()
    }
}

/// Photovoltaic output fraction for the given hour.
pub fn solar_factor(hour: f64, irradiance: f64) -> f64 {
    if (6.0..=18.0).contains(&hour) {
        (PI * (hour - 6.0) / 12.0).sin().max(0.0).powf(1.5) * irradiance
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn curve_points_are_clamped() {
        let curve = daily_load_curve();
        assert!(curve.iter().all(|v| (CURVE_MIN..=CURVE_MAX).contains(v)));
        // evening peak exceeds the overnight trough
        assert!(curve[19] > curve[3]);
    }

    #[test]
    fn load_factor_stays_in_band() {
        let profile = LoadProfile::new(true, true, Utc::now());
        let mut rng = StdRng::seed_from_u64(7);
        for hour in 0..24 {
            for minute in [0, 17, 59] {
                let now = Utc.with_ymd_and_hms(2024, 1, 15, hour, minute, 0).unwrap();
                let factor = profile.load_factor(now, 0.5, &mut rng);
                assert!((LOAD_FACTOR_MIN..=LOAD_FACTOR_MAX).contains(&factor));
            }
        }
    }

    #[test]
    fn interpolation_is_linear_between_points() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let profile = LoadProfile::new(true, false, start);
        let half = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        let expected = (profile.curve()[10] + profile.curve()[11]) / 2.0;
        assert!((profile.base_factor(half) - expected).abs() < 1e-12);

        let late = Utc.with_ymd_and_hms(2024, 6, 1, 23, 30, 0).unwrap();
        let wrapped = (profile.curve()[23] + profile.curve()[0]) / 2.0;
        assert!((profile.base_factor(late) - wrapped).abs() < 1e-12);
    }

    #[test]
    fn disabled_flags_flatten_the_profile() {
        let now = Utc.with_ymd_and_hms(2024, 2, 3, 7, 45, 0).unwrap();
        let profile = LoadProfile::new(false, false, now);
        assert_eq!(profile.base_factor(now), 1.0);
        assert_eq!(profile.seasonal(), SeasonalFactors::neutral());
    }

    #[test]
    fn seasonal_factors_roll_with_the_day() {
        let winter = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).unwrap();
        let mut profile = LoadProfile::new(true, true, winter);
        assert!(!profile.roll_to(winter));
        let next = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert!(profile.roll_to(next));
        assert_eq!(profile.seasonal(), SeasonalFactors::for_day(2));

        let summer = SeasonalFactors::for_day(180);
        assert!((summer.load - 1.15).abs() < 1e-12);
        assert!(SeasonalFactors::for_day(260).solar >= 0.2);
    }

    #[test]
    fn solar_is_dark_outside_daylight() {
        assert_eq!(solar_factor(5.9, 1.0), 0.0);
        assert_eq!(solar_factor(18.5, 1.0), 0.0);
        assert!((solar_factor(12.0, 0.8) - 0.8).abs() < 1e-12);
    }
}
