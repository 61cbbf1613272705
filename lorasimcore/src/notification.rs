//! Typed notification channels.
//!
//! Components emit into a [`Notifier`] they own. Whoever drives the component drains
//! it after each call and hands every notification to the [`Subscriber`]s it has
//! wired up, in emission order.

use crate::units::Time;

#[derive(Debug, Clone)]
pub struct Notifier<E> {
    queue: Vec<(Time, E)>,
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self { queue: Vec::new() }
    }
}

impl<E> Notifier<E> {
    pub fn emit(&mut self, time: Time, event: E) {
        self.queue.push((time, event));
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, (Time, E)> {
        self.queue.drain(..)
    }

    /// Notifications emitted and not yet drained.
    pub fn pending(&self) -> &[(Time, E)] {
        &self.queue
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub trait Subscriber<E> {
    type Error;

    /// `source` is the id of the device or gateway that emitted `event`.
    fn notify(&mut self, time: Time, source: usize, event: &E) -> Result<(), Self::Error>;
}
