//! Event handling.
//!
//! This library exposes an event-based interface for reacting
//! to the state changes of the emulator in real-time. [EventListeners](EventListener)
//! can be registered on the [Emulator](crate::emulator::Emulator) with the
//! [add_listener](crate::emulator::Emulator::add_listener) method.
//!
//! A blanket implementation of [EventListener] for all `FnMut(&Event)` is provided.

use crate::bits::Byte;
use crate::instruction::Operation;

/// Represents an event that occurred while executing a program.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The program wrote a byte into the DATA segment.
    MemoryWrite {
        /// The address of the changed memory location.
        address: u16,

        /// New value of the changed memory location.
        value: Byte,
    },

    /// The program executed one of the host operations (`PUTS`, `GETINT`, ...).
    Syscall {
        operation: Operation,
    },

    /// A `JMP` or a taken `JV` changed the instruction pointer.
    Jump {
        /// Address of the jump micro-operation.
        from: u16,

        /// The new value of the instruction pointer.
        to: u16,
    },

    /// The program executed `HLT`.
    Halt {
        address: u16,
    },
}

/// Trait for consuming events.
pub trait EventListener {
    /// Called whenever a new event has been created.
    fn event(&mut self, event: &Event);
}

impl<F> EventListener for F where F: FnMut(&Event) {
    fn event(&mut self, event: &Event) {
        self(event)
    }
}

pub(crate) struct EventDispatcher {
    listeners: Vec<Box<dyn EventListener>>,
}

impl EventDispatcher {
    pub fn new() -> EventDispatcher {
        EventDispatcher {
            listeners: Vec::new(),
        }
    }

    pub fn add_listener<L: EventListener + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener) as Box<dyn EventListener>)
    }

    pub fn dispatch(&mut self, event: Event) {
        for listener in &mut self.listeners {
            listener.event(&event);
        }
    }
}

#[test]
fn test_dispatch_to_closures() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut dispatcher = EventDispatcher::new();

    let sink = seen.clone();
    dispatcher.add_listener(move |event: &Event| sink.borrow_mut().push(event.clone()));

    dispatcher.dispatch(Event::Halt { address: 3 });
    dispatcher.dispatch(Event::Jump { from: 4, to: 0 });

    assert_eq!(*seen.borrow(), vec![
        Event::Halt { address: 3 },
        Event::Jump { from: 4, to: 0 },
    ]);
}
