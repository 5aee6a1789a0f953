use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{make_serial_data_uuid, make_serial_service_uuid, CONNECT_TIMEOUT, MAX_FRAME_LEN, SCAN_DURATION, WRITE_DEADLINE};
use crate::device::machine::SessionConfig;
use crate::transport::btle::BtleSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub connect_timeout_ms: u64,
    pub write_deadline_ms: u64,
    pub scan_duration_ms: u64,
    pub max_frame_len: usize,
    pub service_uuid: Uuid,
    pub data_characteristic_uuid: Uuid,
    pub name_filter: Option<String>,
}

impl Config {
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            write_deadline: Duration::from_millis(self.write_deadline_ms),
            // a zero limit would reject every status line
            max_frame_len: self.max_frame_len.max(1),
        }
    }

    pub fn btle(&self) -> BtleSettings {
        BtleSettings {
            service_uuid: self.service_uuid,
            data_uuid: self.data_characteristic_uuid,
            scan_duration: Duration::from_millis(self.scan_duration_ms),
            name_filter: self.name_filter.clone().filter(|filter| !filter.is_empty()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            connect_timeout_ms: CONNECT_TIMEOUT,
            write_deadline_ms: WRITE_DEADLINE,
            scan_duration_ms: SCAN_DURATION,
            max_frame_len: MAX_FRAME_LEN,
            service_uuid: make_serial_service_uuid(),
            data_characteristic_uuid: make_serial_data_uuid(),
            name_filter: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "connectTimeoutMs": 2500, "nameFilter": "Feeder" }"#).unwrap();

        assert_eq!(config.session().connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.write_deadline_ms, WRITE_DEADLINE);
        assert_eq!(config.btle().name_filter.as_deref(), Some("Feeder"));
        assert_eq!(config.btle().service_uuid, make_serial_service_uuid());
    }

    #[test]
    fn empty_name_filter_is_ignored() {
        let config = Config { name_filter: Some(String::new()), ..Config::default() };
        assert_eq!(config.btle().name_filter, None);
    }
}
