use uuid::Uuid;

/**
 * How long (milliseconds) a connection attempt may take before the attempt is failed.
 */
pub const CONNECT_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) a write to the data characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) to scan for feeders before reporting the peers that were found.
 */
pub const SCAN_DURATION: u64 = 4000;

/**
 * How often (milliseconds) to check if the peripheral is still connected.
 */
pub const POLL_DELAY: u64 = 1000;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * Longest status line (bytes, excluding the terminator) accepted from the feeder.
 */
pub const MAX_FRAME_LEN: usize = 256;

pub const FRAME_TERMINATOR: u8 = b'\n';

pub const OPCODE_REQUEST_STATUS: u8 = 0x57; // W
pub const OPCODE_DISPENSE: u8 = 0x46; // F

/**
 * The UUID of the serial bridge service exposed by HM-10 style UART modules
 */
pub const SERIAL_SERVICE: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";

/**
 * The UUID of the characteristic carrying the serial byte stream in both directions.
 */
pub const SERIAL_DATA_CHARACTERISTIC: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

pub fn make_serial_service_uuid() -> Uuid {
    Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb)
}

pub fn make_serial_data_uuid() -> Uuid {
    Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_constants_agree() {
        assert_eq!(make_serial_service_uuid().to_string(), SERIAL_SERVICE);
        assert_eq!(make_serial_data_uuid().to_string(), SERIAL_DATA_CHARACTERISTIC);
    }
}
