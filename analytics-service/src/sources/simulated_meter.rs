use std::collections::BTreeMap;
use std::f64::consts::PI;

use energy_client::domain::NewReading;
use rand::{rngs::StdRng, Rng, SeedableRng};
use time::{Date, Duration, OffsetDateTime, Weekday};

use crate::pipeline::{Envelope, EnvelopeStream, Source};

const BASE_MWH: f64 = 50.0;
const BASE_NOISE_STD: f64 = 5.0;
const DAILY_AMPLITUDE: f64 = 0.3;
const WEEKDAY_FACTOR: f64 = 1.2;
const WEEKEND_FACTOR: f64 = 0.8;
const SPIKE_PROBABILITY: f64 = 0.05;
const SUNDAY_HOLIDAY_PROBABILITY: f64 = 0.1;
const REGIONS: u32 = 5;

/// Synthetic hourly smart-meter feed over `[start, end)`.
///
/// Meter `i` belongs to `region_{(i % 5) + 1}`. Meter readings are summed per
/// (hour, region), temperatures averaged, so each hour yields at most one
/// reading per region.
pub struct SimulatedMeterSource {
    start: OffsetDateTime,
    end: OffsetDateTime,
    num_meters: u32,
    seed: Option<u64>,
}

impl SimulatedMeterSource {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime, num_meters: u32, seed: Option<u64>) -> Self {
        Self {
            start,
            end,
            num_meters,
            seed,
        }
    }
}

pub(crate) struct MeterSimulator {
    rng: StdRng,
    num_meters: u32,
    holiday: Option<(Date, bool)>,
}

impl MeterSimulator {
    pub(crate) fn new(num_meters: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            num_meters,
            holiday: None,
        }
    }

    /// Box-Muller.
    fn normal(&mut self, mean: f64, std: f64) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        mean + std * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    fn is_holiday(&mut self, date: Date) -> bool {
        match self.holiday {
            Some((d, flag)) if d == date => flag,
            _ => {
                let flag = date.weekday() == Weekday::Sunday
                    && self.rng.gen::<f64>() < SUNDAY_HOLIDAY_PROBABILITY;
                self.holiday = Some((date, flag));
                flag
            }
        }
    }

    pub(crate) fn hour(&mut self, ts: OffsetDateTime) -> Vec<NewReading> {
        let hour = f64::from(ts.hour());
        let day_of_year = f64::from(ts.ordinal());
        let daily = 1.0 + DAILY_AMPLITUDE * (2.0 * PI * hour / 24.0).sin();
        let weekly = match ts.weekday() {
            Weekday::Saturday | Weekday::Sunday => WEEKEND_FACTOR,
            _ => WEEKDAY_FACTOR,
        };
        let seasonal_temp = 20.0 + 10.0 * (2.0 * PI * day_of_year / 365.0).sin();
        let is_holiday = self.is_holiday(ts.date());

        // region -> (consumption sum, temperature sum, meters)
        let mut by_region: BTreeMap<u32, (f64, f64, u32)> = BTreeMap::new();
        for meter in 0..self.num_meters {
            let mut consumption = self.normal(BASE_MWH, BASE_NOISE_STD) * daily * weekly;
            if self.rng.gen::<f64>() < SPIKE_PROBABILITY {
                consumption *= self.rng.gen_range(2.0..3.0);
            }
            let temperature = seasonal_temp + self.normal(0.0, 2.0);

            let entry = by_region.entry(meter % REGIONS + 1).or_insert((0.0, 0.0, 0));
            entry.0 += consumption.max(0.0);
            entry.1 += temperature;
            entry.2 += 1;
        }

        by_region
            .into_iter()
            .map(|(region, (sum, temp_sum, n))| NewReading {
                ts,
                region: format!("region_{region}"),
                consumption_mwh: sum,
                temperature: Some(temp_sum / f64::from(n)),
                is_holiday,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Source<NewReading> for SimulatedMeterSource {
    async fn stream(&self) -> EnvelopeStream<NewReading> {
        let (start, end) = (self.start, self.end);
        let mut sim = MeterSimulator::new(self.num_meters, self.seed);

        let s = async_stream::stream! {
            let mut ts = start;
            while ts < end {
                for reading in sim.hour(ts) {
                    yield Ok(Envelope::new(reading));
                }
                ts += Duration::HOUR;
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::collections::HashSet;
    use time::macros::datetime;

    #[test]
    fn one_reading_per_region_per_hour() {
        let mut sim = MeterSimulator::new(23, Some(7));
        let readings = sim.hour(datetime!(2024-01-03 12:00:00 UTC));

        assert_eq!(readings.len(), 5);
        let regions: HashSet<_> = readings.iter().map(|r| r.region.as_str()).collect();
        assert!(regions.contains("region_1"));
        assert!(regions.contains("region_5"));
        assert!(readings.iter().all(|r| r.consumption_mwh > 0.0));
    }

    #[test]
    fn few_meters_cover_few_regions() {
        let mut sim = MeterSimulator::new(2, Some(1));
        let readings = sim.hour(datetime!(2024-01-03 00:00:00 UTC));
        let regions: Vec<_> = readings.iter().map(|r| r.region.clone()).collect();
        assert_eq!(regions, vec!["region_1", "region_2"]);
    }

    #[test]
    fn seeded_simulation_is_deterministic() {
        let ts = datetime!(2024-06-10 08:00:00 UTC);
        let a = MeterSimulator::new(10, Some(42)).hour(ts);
        let b = MeterSimulator::new(10, Some(42)).hour(ts);
        assert_eq!(a, b);
    }

    #[test]
    fn weekdays_draw_more_than_weekends_on_average() {
        let mut sim = MeterSimulator::new(200, Some(3));
        // 2024-01-03 is a Wednesday, 2024-01-06 a Saturday; same hour.
        let weekday: f64 = sim.hour(datetime!(2024-01-03 06:00:00 UTC)).iter().map(|r| r.consumption_mwh).sum();
        let weekend: f64 = sim.hour(datetime!(2024-01-06 06:00:00 UTC)).iter().map(|r| r.consumption_mwh).sum();
        assert!(weekday > weekend);
    }

    #[tokio::test]
    async fn stream_covers_half_open_window() {
        let source = SimulatedMeterSource::new(
            datetime!(2024-01-01 00:00:00 UTC),
            datetime!(2024-01-01 03:00:00 UTC),
            5,
            Some(9),
        );
        let items: Vec<_> = source.stream().await.collect().await;
        assert_eq!(items.len(), 15);
        let last = items.last().unwrap().as_ref().unwrap();
        assert_eq!(last.payload.ts, datetime!(2024-01-01 02:00:00 UTC));
    }
}
