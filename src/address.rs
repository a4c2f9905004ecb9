//! Address tracking.
//!
//! Every instruction and data entry carries an [`AddressProvider`]. An address
//! is either resolved (`Some`) or not yet placed (`None`). Other entities can
//! observe an address by registering an [`AddressConsumer`]; this is the only
//! way one section refers to something owned by another section.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Receives a notification whenever an observed address changes.
pub trait AddressConsumer {
    fn address_changed(&self, address: u64);
}

/// An optional memory address plus the consumers that observe it.
#[derive(Default)]
pub struct AddressProvider {
    address: Option<u64>,
    consumers: Vec<Rc<dyn AddressConsumer>>,
}

impl AddressProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current address, or `None` if it has never been assigned.
    pub fn address(&self) -> Option<u64> {
        self.address
    }

    pub fn is_address_valid(&self) -> bool {
        self.address.is_some()
    }

    /// Assigns a new address and notifies consumers in registration order.
    ///
    /// Returns `false` (and notifies nobody) if the address is unchanged.
    pub fn set_address(&mut self, address: u64) -> bool {
        if self.address == Some(address) {
            return false;
        }
        self.address = Some(address);
        for consumer in &self.consumers {
            consumer.address_changed(address);
        }
        true
    }

    /// Forgets the address without notifying anyone.
    #[cfg(test)]
    pub(crate) fn reset(&mut self) {
        self.address = None;
    }

    /// Registers a consumer. Registering the same consumer twice is a no-op.
    pub fn add_consumer(&mut self, consumer: Rc<dyn AddressConsumer>) {
        if !self.consumers.iter().any(|c| Rc::ptr_eq(c, &consumer)) {
            self.consumers.push(consumer);
        }
    }

    pub fn remove_consumer(&mut self, consumer: &Rc<dyn AddressConsumer>) {
        self.consumers.retain(|c| !Rc::ptr_eq(c, consumer));
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

impl fmt::Debug for AddressProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressProvider")
            .field("address", &self.address)
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

/// A consumer that remembers the last address it was told about.
///
/// Encoders hold an `Rc<AddressWatch>` to read the address of a label they
/// reference without owning the label.
#[derive(Debug, Default)]
pub struct AddressWatch {
    address: Cell<Option<u64>>,
}

impl AddressWatch {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn get(&self) -> Option<u64> {
        self.address.get()
    }
}

impl AddressConsumer for AddressWatch {
    fn address_changed(&self, address: u64) {
        self.address.set(Some(address));
    }
}
