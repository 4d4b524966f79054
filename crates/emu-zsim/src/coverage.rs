//! Code coverage: which addresses have been executed.

/// Executed addresses, each recorded once, in first-seen order.
#[derive(Debug, Clone)]
pub struct Coverage {
    seen: Vec<u64>,
    order: Vec<u16>,
}

impl Coverage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: vec![0; 0x10000 / 64],
            order: Vec::new(),
        }
    }

    pub fn store(&mut self, address: u16) {
        let (word, bit) = (usize::from(address >> 6), address & 63);
        if self.seen[word] & (1 << bit) == 0 {
            self.seen[word] |= 1 << bit;
            self.order.push(address);
        }
    }

    #[must_use]
    pub fn contains(&self, address: u16) -> bool {
        self.seen[usize::from(address >> 6)] & (1 << (address & 63)) != 0
    }

    /// Addresses in the order they were first executed.
    #[must_use]
    pub fn addresses(&self) -> &[u16] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.fill(0);
        self.order.clear();
    }
}

impl Default for Coverage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_recorded_once_in_order() {
        let mut cov = Coverage::new();
        for addr in [0x8000, 0x8003, 0x8000, 0xFFFF, 0x8003] {
            cov.store(addr);
        }
        assert_eq!(cov.addresses(), [0x8000, 0x8003, 0xFFFF]);
        assert!(cov.contains(0xFFFF));
        assert!(!cov.contains(0x8001));
    }

    #[test]
    fn clear_resets_everything() {
        let mut cov = Coverage::new();
        cov.store(0x0038);
        cov.clear();
        assert!(cov.is_empty());
        assert!(!cov.contains(0x0038));
        cov.store(0x0038);
        assert_eq!(cov.len(), 1);
    }
}
