//! Built-in sample dataset.
//!
//! Five assets, a market index and four macro indicators over one trading
//! year, generated from a fixed seed with a known linear structure:
//!
//! ```text
//! fed_rate ──► inflation ──┐
//!    │   └────► gdp_growth ─┼──► asset_1..asset_5 ──► MKT
//!    └──────────────────────┘
//! ```
//!
//! The same bytes come out on every call.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::series::{Observation, SeriesKind, TimeSeries};
use super::store::{DataSource, Dataset};

pub const SAMPLE_SEED: u64 = 42;
pub const SAMPLE_DAYS: usize = 253;
pub const SAMPLE_BENCHMARK: &str = "MKT";

const FED_BETA: [f64; 5] = [-0.08, -0.05, 0.06, -0.07, 0.05];
const INFLATION_BETA: [f64; 5] = [-0.03, 0.02, -0.02, 0.01, -0.04];
const GDP_BETA: [f64; 5] = [0.05, 0.04, 0.02, 0.06, 0.01];
const DRIFT: f64 = 0.0004;
const SAMPLE_START: NaiveDate = match NaiveDate::from_ymd_opt(2023, 1, 2) {
    Some(date) => date,
    None => panic!("invalid sample start date"),
};
const IDIOSYNCRATIC_VOL: f64 = 0.01;

/// Standard normal draw via Box-Muller.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// `count` weekdays starting at `start` (inclusive when a weekday).
pub fn business_days(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(count);
    let mut day = start;
    while out.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(day);
        }
        day += Duration::days(1);
    }
    out
}

fn series(name: &str, kind: SeriesKind, dates: &[NaiveDate], values: &[f64]) -> TimeSeries {
    let points = dates
        .iter()
        .zip(values)
        .map(|(&d, &v)| Observation::new(d, v))
        .collect();
    TimeSeries::from_trusted(name, kind, points)
}

/// The fixed sample dataset: asset and index prices plus macro levels.
pub fn sample_dataset() -> Dataset {
    let dates = business_days(SAMPLE_START, SAMPLE_DAYS);
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);

    let mut fed = vec![4.50];
    let mut inflation = vec![3.0];
    let mut gdp = vec![2.5];
    let mut unemployment = vec![3.8];
    let mut prices = vec![vec![100.0]; FED_BETA.len()];
    let mut market = vec![4000.0];

    for t in 1..SAMPLE_DAYS {
        let d_fed = 0.05 * standard_normal(&mut rng);
        let d_inflation = 0.4 * d_fed + 0.02 * standard_normal(&mut rng);
        let d_gdp = -0.3 * d_fed + 0.02 * standard_normal(&mut rng);
        let d_unemployment = 0.015 * standard_normal(&mut rng);

        fed.push(fed[t - 1] + d_fed);
        inflation.push(inflation[t - 1] + d_inflation);
        gdp.push(gdp[t - 1] + d_gdp);
        unemployment.push(unemployment[t - 1] + d_unemployment);

        let mut mean_return = 0.0;
        for (i, path) in prices.iter_mut().enumerate() {
            let r = DRIFT
                + FED_BETA[i] * d_fed
                + INFLATION_BETA[i] * d_inflation
                + GDP_BETA[i] * d_gdp
                + IDIOSYNCRATIC_VOL * standard_normal(&mut rng);
            path.push(path[t - 1] * (1.0 + r));
            mean_return += r / FED_BETA.len() as f64;
        }
        let market_return = mean_return + 0.002 * standard_normal(&mut rng);
        market.push(market[t - 1] * (1.0 + market_return));
    }

    let mut out = Vec::with_capacity(prices.len() + 5);
    for (i, path) in prices.iter().enumerate() {
        out.push(series(
            &format!("asset_{}", i + 1),
            SeriesKind::AssetPrice,
            &dates,
            path,
        ));
    }
    out.push(series(SAMPLE_BENCHMARK, SeriesKind::AssetPrice, &dates, &market));
    out.push(series("fed_rate", SeriesKind::Macro, &dates, &fed));
    out.push(series("inflation", SeriesKind::Macro, &dates, &inflation));
    out.push(series("gdp_growth", SeriesKind::Macro, &dates, &gdp));
    out.push(series("unemployment", SeriesKind::Macro, &dates, &unemployment));

    Dataset::from_trusted(out, DataSource::Sample)
}
