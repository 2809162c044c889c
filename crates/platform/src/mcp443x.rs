//! MCP443x quad digital potentiometer command builder.
//!
//! The pot sits on the analog frontend: one wiper per audio input channel
//! plus one for the microphone preamp. Like [`mcp4728`](crate::mcp4728) this
//! module only builds bytes; the frontend pushes them through its port.
//!
//! Reference: Microchip MCP4431/4451 datasheet (DS22265A), §7.0.

/// 7-bit I2C device address (A0/A1 strapped low).
pub const MCP443X_I2C_ADDR: u8 = 0x2C;

/// Wipers on the device.
pub const MCP443X_WIPERS: usize = 4;

/// Largest wiper setting carried in the data byte.
pub const MCP443X_MAX_VALUE: u8 = 0xFF;

/// Volatile wiper register addresses, indexed by wiper. The four wipers are
/// not contiguous in the register map.
const WIPER_ADDRESSES: [u8; MCP443X_WIPERS] = [0x00, 0x01, 0x06, 0x07];

/// Build the 2-byte volatile wiper write for `wiper` (0..=3).
///
/// Layout: `[AD3..AD0 C1 C0 D9 D8] [D7..D0]` with C1:C0 = 00 (write). The
/// 9th data bit only matters for the full-scale code and is left clear; the
/// usable range here is 0..=255.
///
/// Returns `None` for an out-of-range wiper index.
#[must_use]
pub fn build_write_cmd(wiper: usize, value: u8) -> Option<[u8; 2]> {
    let addr = *WIPER_ADDRESSES.get(wiper)?;
    Some([addr << 4, value])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wiper_register_addresses_per_datasheet() {
        assert_eq!(build_write_cmd(0, 0).unwrap()[0], 0x00);
        assert_eq!(build_write_cmd(1, 0).unwrap()[0], 0x10);
        assert_eq!(build_write_cmd(2, 0).unwrap()[0], 0x60);
        assert_eq!(build_write_cmd(3, 0).unwrap()[0], 0x70);
    }

    #[test]
    fn data_byte_is_the_wiper_value() {
        let cmd = build_write_cmd(2, 0xA5).unwrap();
        assert_eq!(cmd[1], 0xA5);
    }

    #[test]
    fn out_of_range_wiper_is_rejected() {
        assert!(build_write_cmd(MCP443X_WIPERS, 0).is_none());
    }

    #[test]
    fn address_is_not_reserved() {
        assert!(!crate::i2c::is_reserved_addr(MCP443X_I2C_ADDR));
    }
}
