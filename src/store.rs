use crate::instrument::{Instrument, InstrumentError};
use crate::patch::{InstrumentPatch, PatchError};
use std::sync::{mpsc, Mutex};

/// Change notifications fired by the [`InstrumentStore`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum StoreEvent {
    /// A different instrument became active.
    ActiveInstrumentChanged,
    /// A merge changed at least one field of the active instrument.
    InstrumentMutated,
}

/// Control-thread owner of the active instrument.
///
/// Observers subscribe explicitly; there is no global event bus. Events are
/// only fired when something actually changed, so a no-op merge is silent.
pub struct InstrumentStore {
    active: Mutex<Instrument>,
    observers: Mutex<Vec<mpsc::Sender<StoreEvent>>>,
}

impl InstrumentStore {
    pub fn new(instrument: Instrument) -> Result<Self, InstrumentError> {
        instrument.validate()?;
        Ok(Self {
            active: Mutex::new(instrument),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Returns a deep-immutable copy of the active instrument.
    pub fn snapshot(&self) -> Instrument {
        self.active.lock().unwrap().clone()
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> mpsc::Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.observers.lock().unwrap().push(tx);
        rx
    }

    /// Replaces the active instrument.
    pub fn set_active(&self, instrument: Instrument) -> Result<(), InstrumentError> {
        instrument.validate()?;
        let changed = {
            let mut active = self.active.lock().unwrap();
            if *active == instrument {
                false
            } else {
                *active = instrument;
                true
            }
        };
        if changed {
            log::debug!("active instrument changed");
            self.notify(StoreEvent::ActiveInstrumentChanged);
        }
        Ok(())
    }

    /// Merges a partial instrument into the active one. Returns `true` if
    /// any field changed, in which case observers are notified.
    pub fn merge(&self, patch: &InstrumentPatch) -> Result<bool, PatchError> {
        let changed = patch.apply(&mut self.active.lock().unwrap())?;
        if changed {
            log::debug!("instrument mutated");
            self.notify(StoreEvent::InstrumentMutated);
        }
        Ok(changed)
    }

    fn notify(&self, event: StoreEvent) {
        // Drop observers whose receiving end has gone away.
        self.observers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event).is_ok());
    }
}
