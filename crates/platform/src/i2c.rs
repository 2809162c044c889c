//! Bounded I²C port abstraction.
//!
//! Every transfer must complete or fail within the port's timeout; the engine
//! never blocks on a wedged bus. Implementations wrap whatever bus the MCU
//! HAL provides and are responsible for their own cross-core locking (the
//! original hardware shares each bus between both cores behind a mutex with
//! a 10 ms acquisition bound).

use thiserror_no_std::Error;

/// Per-transfer timeout applied by port implementations, in microseconds.
pub const I2C_DEVICE_TIMEOUT_US: u32 = 2_000;

/// I²C transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cError {
    /// The transfer did not complete within the timeout.
    #[error("bus timeout")]
    Timeout,
    /// No device acknowledged the address.
    #[error("address not acknowledged")]
    Nack,
    /// Arbitration loss or other bus-level fault.
    #[error("bus fault")]
    Bus,
}

/// True for the 1111XXX / 0000XXX address ranges the I²C spec reserves.
#[inline]
#[must_use]
pub const fn is_reserved_addr(addr: u8) -> bool {
    (addr & 0x78) == 0 || (addr & 0x78) == 0x78
}

/// A short-timeout I²C port.
pub trait I2cPort {
    /// Write `bytes` to the device at `addr`.
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), I2cError>;

    /// Read `buf.len()` bytes from the device at `addr`.
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), I2cError>;

    /// Number of bytes that can currently be queued without blocking.
    ///
    /// The output scheduler polls this before DAC writes and defers when the
    /// hardware FIFO is too full.
    fn write_available(&self) -> usize;

    /// Probe `addr` with a one-byte dummy read.
    ///
    /// Reserved addresses are rejected without touching the bus.
    fn probe(&mut self, addr: u8) -> bool {
        if is_reserved_addr(addr) {
            return false;
        }
        let mut scratch = [0u8; 1];
        self.read(addr, &mut scratch).is_ok()
    }
}

/// Adapter presenting any blocking `embedded-hal` bus as an [`I2cPort`].
///
/// Since the wrapped bus blocks until completion, write capacity is always
/// reported as unbounded; timeout enforcement is the wrapped HAL's job.
pub struct BlockingPort<I> {
    bus: I,
}

impl<I> BlockingPort<I> {
    /// Wrap an `embedded-hal` I²C bus.
    pub fn new(bus: I) -> Self {
        Self { bus }
    }

    /// Give the wrapped bus back.
    pub fn release(self) -> I {
        self.bus
    }
}

impl<I: embedded_hal::i2c::I2c> I2cPort for BlockingPort<I> {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), I2cError> {
        self.bus.write(addr, bytes).map_err(|_| I2cError::Bus)
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), I2cError> {
        self.bus.read(addr, buf).map_err(|_| I2cError::Bus)
    }

    fn write_available(&self) -> usize {
        usize::MAX
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockI2c {
        writes: Vec<(u8, Vec<u8>)>,
    }

    impl embedded_hal::i2c::ErrorType for MockI2c {
        type Error = core::convert::Infallible;
    }

    impl embedded_hal::i2c::I2c for MockI2c {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [embedded_hal::i2c::Operation<'_>],
        ) -> Result<(), Self::Error> {
            for op in operations.iter_mut() {
                match op {
                    embedded_hal::i2c::Operation::Write(data) => {
                        self.writes.push((address, data.to_vec()));
                    }
                    embedded_hal::i2c::Operation::Read(buf) => {
                        buf.fill(0);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn reserved_address_ranges() {
        assert!(is_reserved_addr(0x00));
        assert!(is_reserved_addr(0x07));
        assert!(is_reserved_addr(0x78));
        assert!(is_reserved_addr(0x7F));
        assert!(!is_reserved_addr(0x60));
        assert!(!is_reserved_addr(0x2C));
    }

    #[test]
    fn probe_rejects_reserved_without_bus_traffic() {
        let mut port = BlockingPort::new(MockI2c::default());
        assert!(!port.probe(0x00));
        assert!(port.probe(0x60));
    }

    #[test]
    fn blocking_port_forwards_writes() {
        let mut port = BlockingPort::new(MockI2c::default());
        port.write(0x60, &[0x40, 0x0F, 0xFF]).unwrap();
        let bus = port.release();
        assert_eq!(bus.writes, vec![(0x60, vec![0x40, 0x0F, 0xFF])]);
    }

    #[test]
    fn blocking_port_reports_unbounded_capacity() {
        let port = BlockingPort::new(MockI2c::default());
        assert!(port.write_available() >= 5);
    }
}
