//! I/O port dispatch.
//!
//! A port can have one specific read and one specific write handler. On
//! top of that any number of generic handlers see every access. Generic
//! read handlers may decline by returning `None`; the answers of the others
//! are combined like a wired bus.

use std::collections::HashMap;

use serde::Deserialize;

/// How generic read results are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortCombine {
    /// Open-collector bus: idle 0xFF, any device can pull bits low.
    #[default]
    OpenCollector,
    /// Idle 0x00, devices drive bits high.
    Or,
}

impl PortCombine {
    #[must_use]
    pub const fn idle(self) -> u8 {
        match self {
            PortCombine::OpenCollector => 0xFF,
            PortCombine::Or => 0x00,
        }
    }

    #[must_use]
    pub const fn combine(self, a: u8, b: u8) -> u8 {
        match self {
            PortCombine::OpenCollector => a & b,
            PortCombine::Or => a | b,
        }
    }
}

pub type SpecificReadHandler = Box<dyn FnMut(u16) -> u8>;
pub type GenericReadHandler = Box<dyn FnMut(u16) -> Option<u8>>;
pub type WriteHandler = Box<dyn FnMut(u16, u8)>;

/// Port handler table.
pub struct Ports {
    combine: PortCombine,
    specific_read: HashMap<u16, SpecificReadHandler>,
    specific_write: HashMap<u16, WriteHandler>,
    generic_read: Vec<GenericReadHandler>,
    generic_write: Vec<WriteHandler>,
}

impl Ports {
    #[must_use]
    pub fn new(combine: PortCombine) -> Self {
        Self {
            combine,
            specific_read: HashMap::new(),
            specific_write: HashMap::new(),
            generic_read: Vec::new(),
            generic_write: Vec::new(),
        }
    }

    #[must_use]
    pub fn combine_mode(&self) -> PortCombine {
        self.combine
    }

    /// Register the read handler for one port, replacing any previous one.
    pub fn register_read(&mut self, port: u16, handler: impl FnMut(u16) -> u8 + 'static) {
        self.specific_read.insert(port, Box::new(handler));
    }

    /// Register the write handler for one port, replacing any previous one.
    pub fn register_write(&mut self, port: u16, handler: impl FnMut(u16, u8) + 'static) {
        self.specific_write.insert(port, Box::new(handler));
    }

    pub fn register_generic_read(&mut self, handler: impl FnMut(u16) -> Option<u8> + 'static) {
        self.generic_read.push(Box::new(handler));
    }

    pub fn register_generic_write(&mut self, handler: impl FnMut(u16, u8) + 'static) {
        self.generic_write.push(Box::new(handler));
    }

    pub fn unregister_read(&mut self, port: u16) -> bool {
        self.specific_read.remove(&port).is_some()
    }

    pub fn unregister_write(&mut self, port: u16) -> bool {
        self.specific_write.remove(&port).is_some()
    }

    pub fn read(&mut self, port: u16) -> u8 {
        self.read_merged(port, None)
    }

    /// Read a port with one extra generic answer from a built-in device.
    /// A specific handler overrides everything else.
    pub fn read_merged(&mut self, port: u16, device: Option<u8>) -> u8 {
        if let Some(handler) = self.specific_read.get_mut(&port) {
            return handler(port);
        }
        let combine = self.combine;
        let mut value = device.map_or(combine.idle(), |v| combine.combine(combine.idle(), v));
        for handler in &mut self.generic_read {
            if let Some(v) = handler(port) {
                value = combine.combine(value, v);
            }
        }
        value
    }

    pub fn write(&mut self, port: u16, value: u8) {
        if let Some(handler) = self.specific_write.get_mut(&port) {
            handler(port, value);
        }
        for handler in &mut self.generic_write {
            handler(port, value);
        }
    }
}

impl std::fmt::Debug for Ports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ports")
            .field("combine", &self.combine)
            .field("specific_read", &self.specific_read.len())
            .field("specific_write", &self.specific_write.len())
            .field("generic_read", &self.generic_read.len())
            .field("generic_write", &self.generic_write.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use proptest::prelude::*;

    use super::*;

    fn make_ports(combine: PortCombine, answers: &[u8]) -> Ports {
        let mut ports = Ports::new(combine);
        for &answer in answers {
            ports.register_generic_read(move |_| Some(answer));
        }
        ports
    }

    #[test]
    fn open_collector_ands_answers() {
        let mut ports = make_ports(PortCombine::OpenCollector, &[0xA5, 0xF0]);
        assert_eq!(ports.read(0x1234), 0xA0);
    }

    #[test]
    fn or_combination() {
        let mut ports = make_ports(PortCombine::Or, &[0xA5, 0xF0]);
        assert_eq!(ports.read(0x1234), 0xF5);
    }

    #[test]
    fn idle_bus_values() {
        assert_eq!(Ports::new(PortCombine::OpenCollector).read(0xFE), 0xFF);
        assert_eq!(Ports::new(PortCombine::Or).read(0xFE), 0x00);
    }

    #[test]
    fn declining_handlers_do_not_count() {
        let mut ports = make_ports(PortCombine::Or, &[0x0F]);
        ports.register_generic_read(|port| (port == 0xFE).then_some(0xF0));
        assert_eq!(ports.read(0x00FD), 0x0F);
        assert_eq!(ports.read(0x00FE), 0xFF);
    }

    #[test]
    fn specific_read_overrides_generic() {
        let mut ports = make_ports(PortCombine::OpenCollector, &[0x00]);
        ports.register_read(0x7FFE, |_| 0xBF);
        assert_eq!(ports.read(0x7FFE), 0xBF);
        assert_eq!(ports.read_merged(0x7FFE, Some(0x00)), 0xBF);
        assert_eq!(ports.read(0xFEFE), 0x00);
    }

    #[test]
    fn device_answer_is_combined() {
        let mut ports = make_ports(PortCombine::OpenCollector, &[0xF7]);
        assert_eq!(ports.read_merged(0xFE, Some(0xBF)), 0xB7);
    }

    #[test]
    fn writes_reach_specific_and_all_generic_handlers() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut ports = Ports::new(PortCombine::OpenCollector);
        let l = Rc::clone(&log);
        ports.register_write(0x7FFD, move |p, v| l.borrow_mut().push(("specific", p, v)));
        for _ in 0..2 {
            let l = Rc::clone(&log);
            ports.register_generic_write(move |p, v| l.borrow_mut().push(("generic", p, v)));
        }
        ports.write(0x7FFD, 0x10);
        ports.write(0x00FE, 0x07);
        assert_eq!(log.borrow().len(), 5);
        assert_eq!(log.borrow()[0], ("specific", 0x7FFD, 0x10));
    }

    #[test]
    fn registering_does_not_drop_generic_handlers() {
        let mut ports = make_ports(PortCombine::Or, &[0x01, 0x02]);
        ports.register_read(0x10, |_| 0x80);
        assert!(ports.unregister_read(0x10));
        assert_eq!(ports.read(0x10), 0x03);
    }

    proptest! {
        #[test]
        fn combination_is_fold_over_idle(answers in proptest::collection::vec(any::<u8>(), 0..6)) {
            let mut and = make_ports(PortCombine::OpenCollector, &answers);
            let mut or = make_ports(PortCombine::Or, &answers);
            prop_assert_eq!(and.read(0), answers.iter().fold(0xFF, |a, &b| a & b));
            prop_assert_eq!(or.read(0), answers.iter().fold(0x00, |a, &b| a | b));
        }
    }
}
