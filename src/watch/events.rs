use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::error::DetectError;

/// Notifications from the detection loop to its controller.
#[derive(Clone, Debug, PartialEq)]
pub enum LoopEvent {
    /// One pass failed; the loop carries on with the next one.
    IterationFailed(DetectError),
    /// A run ended. `fatal` is set when the loop stopped itself.
    Stopped { fatal: Option<DetectError> },
}

/// Fan-out of loop events to any number of subscribers.
#[derive(Default)]
pub(crate) struct EventHub {
    subscribers: Mutex<Vec<Sender<LoopEvent>>>,
}

impl EventHub {
    pub(crate) fn subscribe(&self) -> Receiver<LoopEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping the ones that hung up.
    pub(crate) fn publish(&self, event: LoopEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<LoopEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
