use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One upload of heart rate samples from a device, as read from the
/// BiometricsImported topic. Field names follow the ingestion API's JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Biometrics {
    pub device_id: Uuid,
    /// In chronological order
    pub heart_rates: Vec<HeartRate>,
    pub max_heart_rate: NonZeroU32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeartRate {
    pub date_time: DateTime<Utc>,
    /// Beats per minute
    pub value: u32,
}

/// Training zones, ordered by intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HeartRateZone {
    None,
    Zone1,
    Zone2,
    Zone3,
    Zone4,
    Zone5,
}

impl HeartRateZone {
    pub const ALL: [HeartRateZone; 6] = [
        HeartRateZone::None,
        HeartRateZone::Zone1,
        HeartRateZone::Zone2,
        HeartRateZone::Zone3,
        HeartRateZone::Zone4,
        HeartRateZone::Zone5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HeartRateZone::None => "none",
            HeartRateZone::Zone1 => "zone1",
            HeartRateZone::Zone2 => "zone2",
            HeartRateZone::Zone3 => "zone3",
            HeartRateZone::Zone4 => "zone4",
            HeartRateZone::Zone5 => "zone5",
        }
    }
}

/// Published to the HeartRateZoneReached topic, one per sample in a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeartRateZoneReached {
    pub device_id: Uuid,
    pub zone: HeartRateZone,
    pub date_time: DateTime<Utc>,
    pub heart_rate: u32,
    pub max_heart_rate: NonZeroU32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn biometrics_from_ingestion_json() {
        let payload = json!({
            "DeviceId": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "HeartRates": [
                {"DateTime": "2024-05-01T10:00:00Z", "Value": 100},
                {"DateTime": "2024-05-01T10:00:05Z", "Value": 140}
            ],
            "MaxHeartRate": 200
        });

        let biometrics: Biometrics = serde_json::from_value(payload).unwrap();
        assert_eq!(
            biometrics.device_id.to_string(),
            "3fa85f64-5717-4562-b3fc-2c963f66afa6"
        );
        assert_eq!(biometrics.heart_rates.len(), 2);
        assert_eq!(biometrics.heart_rates[1].value, 140);
        assert_eq!(biometrics.max_heart_rate.get(), 200);
    }

    #[test]
    fn non_positive_max_heart_rate_is_rejected() {
        for max in [json!(0), json!(-180)] {
            let payload = json!({
                "DeviceId": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
                "HeartRates": [],
                "MaxHeartRate": max
            });
            assert!(serde_json::from_value::<Biometrics>(payload).is_err());
        }
    }

    #[test]
    fn zone_event_json() {
        let event = HeartRateZoneReached {
            device_id: Uuid::nil(),
            zone: HeartRateZone::Zone3,
            date_time: "2024-05-01T10:00:05Z".parse().unwrap(),
            heart_rate: 140,
            max_heart_rate: NonZeroU32::new(200).unwrap(),
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "DeviceId": "00000000-0000-0000-0000-000000000000",
                "Zone": "Zone3",
                "DateTime": "2024-05-01T10:00:05Z",
                "HeartRate": 140,
                "MaxHeartRate": 200
            })
        );
    }
}
