//! Memory and I/O bus interface.

/// Memory and I/O bus interface.
///
/// The CPU reaches memory and peripherals only through this trait. The bus
/// handles address decoding, bank mapping and port dispatch.
pub trait Bus {
    /// Read a byte from the given address.
    fn read(&mut self, address: u16) -> u8;

    /// Write a byte to the given address.
    fn write(&mut self, address: u16, value: u8);

    /// Opcode fetch (M1 cycle).
    ///
    /// `refresh` is the address the CPU drives during the refresh half of
    /// the cycle (`I << 8 | R`). Video hardware on some machines decodes it,
    /// so it is handed to the bus. The default is a plain read.
    fn fetch(&mut self, address: u16, refresh: u16) -> u8 {
        let _ = refresh;
        self.read(address)
    }

    /// Read a byte from an I/O port.
    fn io_read(&mut self, port: u16) -> u8;

    /// Write a byte to an I/O port.
    fn io_write(&mut self, port: u16, value: u8);
}

/// Flat 64 KiB RAM bus with no peripherals.
///
/// Port reads return `0xFF`; port writes are remembered in `last_io_write`
/// so tests can observe them.
pub struct SimpleBus {
    pub ram: Vec<u8>,
    pub last_io_write: Option<(u16, u8)>,
}

impl SimpleBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ram: vec![0; 0x10000],
            last_io_write: None,
        }
    }

    /// Copy `bytes` into RAM starting at `address`, wrapping at 64 KiB.
    pub fn load(&mut self, address: u16, bytes: &[u8]) {
        let mut addr = address;
        for &b in bytes {
            self.ram[addr as usize] = b;
            addr = addr.wrapping_add(1);
        }
    }
}

impl Default for SimpleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimpleBus {
    fn read(&mut self, address: u16) -> u8 {
        self.ram[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.ram[address as usize] = value;
    }

    fn io_read(&mut self, _port: u16) -> u8 {
        0xFF
    }

    fn io_write(&mut self, port: u16, value: u8) {
        self.last_io_write = Some((port, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_wraps_at_top_of_memory() {
        let mut bus = SimpleBus::new();
        bus.load(0xFFFF, &[0x11, 0x22]);
        assert_eq!(bus.read(0xFFFF), 0x11);
        assert_eq!(bus.read(0x0000), 0x22);
    }

    #[test]
    fn fetch_defaults_to_read() {
        let mut bus = SimpleBus::new();
        bus.write(0x1234, 0x76);
        assert_eq!(bus.fetch(0x1234, 0x1E05), 0x76);
    }
}
