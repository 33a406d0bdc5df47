use std::num::NonZeroU32;

use crate::types::{Biometrics, HeartRateZone, HeartRateZoneReached};

/// Percentage of the max heart rate at which a zone starts.
fn threshold_percent(zone: HeartRateZone) -> Option<u64> {
    match zone {
        HeartRateZone::None => None,
        HeartRateZone::Zone1 => Some(50),
        HeartRateZone::Zone2 => Some(60),
        HeartRateZone::Zone3 => Some(70),
        HeartRateZone::Zone4 => Some(80),
        HeartRateZone::Zone5 => Some(90),
    }
}

/// Highest zone whose threshold the sample reaches, as a fraction of the
/// max heart rate. The comparison `value / max >= percent / 100` is done on
/// integers, so it is exact at the thresholds.
pub fn classify(value: u32, max_heart_rate: NonZeroU32) -> HeartRateZone {
    let scaled_value = u64::from(value) * 100;
    let max = u64::from(max_heart_rate.get());

    HeartRateZone::ALL
        .into_iter()
        .filter(|zone| {
            threshold_percent(*zone).is_some_and(|percent| scaled_value >= max * percent)
        })
        .max()
        .unwrap_or(HeartRateZone::None)
}

/// Events for every sample of the record that is in a zone, in sample order.
pub fn zone_events(biometrics: &Biometrics) -> Vec<HeartRateZoneReached> {
    biometrics
        .heart_rates
        .iter()
        .filter_map(|heart_rate| {
            let zone = classify(heart_rate.value, biometrics.max_heart_rate);
            (zone != HeartRateZone::None).then(|| HeartRateZoneReached {
                device_id: biometrics.device_id,
                zone,
                date_time: heart_rate.date_time,
                heart_rate: heart_rate.value,
                max_heart_rate: biometrics.max_heart_rate,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HeartRate;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn max(value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).unwrap()
    }

    fn biometrics(values: &[u32]) -> Biometrics {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Biometrics {
            device_id: Uuid::new_v4(),
            heart_rates: values
                .iter()
                .enumerate()
                .map(|(i, value)| HeartRate {
                    date_time: start + Duration::seconds(5 * i as i64),
                    value: *value,
                })
                .collect(),
            max_heart_rate: max(200),
        }
    }

    #[test]
    fn classifies_samples_against_max_heart_rate() {
        assert_eq!(classify(100, max(200)), HeartRateZone::Zone1);
        assert_eq!(classify(140, max(200)), HeartRateZone::Zone3);
        assert_eq!(classify(190, max(200)), HeartRateZone::Zone5);
        assert_eq!(classify(50, max(200)), HeartRateZone::None);
        assert_eq!(classify(0, max(200)), HeartRateZone::None);
        // Above the max still counts as the top zone
        assert_eq!(classify(230, max(200)), HeartRateZone::Zone5);
    }

    #[test]
    fn zone_starts_exactly_at_threshold() {
        let cases = [
            (100, HeartRateZone::Zone1),
            (120, HeartRateZone::Zone2),
            (140, HeartRateZone::Zone3),
            (160, HeartRateZone::Zone4),
            (180, HeartRateZone::Zone5),
        ];
        let mut below = HeartRateZone::None;
        for (boundary, zone) in cases {
            assert_eq!(classify(boundary, max(200)), zone);
            assert_eq!(classify(boundary - 1, max(200)), below);
            below = zone;
        }

        // 0.5 * 7 = 3.5, 0.7 * 10 = 7
        assert_eq!(classify(3, max(7)), HeartRateZone::None);
        assert_eq!(classify(4, max(7)), HeartRateZone::Zone1);
        assert_eq!(classify(7, max(10)), HeartRateZone::Zone3);
        assert_eq!(classify(6, max(10)), HeartRateZone::Zone2);
    }

    #[test]
    fn classification_is_monotonic_in_heart_rate() {
        for max_heart_rate in [1, 7, 150, 187, 200, 220] {
            let mut previous = HeartRateZone::None;
            for value in 0..=300 {
                let zone = classify(value, max(max_heart_rate));
                assert!(zone >= previous, "{value}/{max_heart_rate}");
                assert_eq!(zone, classify(value, max(max_heart_rate)));
                previous = zone;
            }
        }
    }

    #[test]
    fn large_values_do_not_overflow() {
        assert_eq!(classify(u32::MAX, max(u32::MAX)), HeartRateZone::Zone5);
        assert_eq!(classify(u32::MAX / 2, max(u32::MAX)), HeartRateZone::None);
    }

    #[test]
    fn events_keep_sample_order_and_skip_unzoned_samples() {
        let record = biometrics(&[100, 140, 50]);
        let events = zone_events(&record);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].zone, HeartRateZone::Zone1);
        assert_eq!(events[0].heart_rate, 100);
        assert_eq!(events[0].date_time, record.heart_rates[0].date_time);
        assert_eq!(events[1].zone, HeartRateZone::Zone3);
        assert_eq!(events[1].heart_rate, 140);
        assert_eq!(events[1].date_time, record.heart_rates[1].date_time);
        for event in &events {
            assert_eq!(event.device_id, record.device_id);
            assert_eq!(event.max_heart_rate, record.max_heart_rate);
        }
    }

    #[test]
    fn one_event_per_sample_in_the_same_zone() {
        let events = zone_events(&biometrics(&[185, 190, 195]));
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.zone == HeartRateZone::Zone5));
    }

    #[test]
    fn record_without_zoned_samples_has_no_events() {
        assert!(zone_events(&biometrics(&[])).is_empty());
        assert!(zone_events(&biometrics(&[40, 60, 99])).is_empty());
    }
}
