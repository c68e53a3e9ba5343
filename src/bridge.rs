//! Cross-user broadcast relay: action-keyed receiver registry.
//!
//! Registration, unregistration, and dispatch lookup are mutually exclusive
//! under a single coarse lock; actual delivery to each receiver runs on a
//! dedicated worker thread, never under the lock, so a slow receiver cannot
//! stall registration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crossbeam::channel::Sender;
use thiserror::Error;

use crate::core::ArgBag;
use crate::error::Transience;

/// A relayed broadcast: logical action name plus a tagged argument bag.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeMessage {
    pub action: String,
    pub args: ArgBag,
}

impl BridgeMessage {
    pub fn new(action: impl Into<String>, args: ArgBag) -> Self {
        Self {
            action: action.into(),
            args,
        }
    }
}

type ReceiverFn = Arc<dyn Fn(&BridgeMessage) + Send + Sync>;

/// Handle returned by [`RelayBridge::register`]; pass to `unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(u64);

struct DeliveryJob {
    message: BridgeMessage,
    targets: Vec<ReceiverFn>,
}

struct BridgeState {
    next_id: u64,
    receivers: HashMap<String, Vec<(ReceiverId, ReceiverFn)>>,
}

/// Action-keyed receiver registry with asynchronous delivery.
pub struct RelayBridge {
    state: Mutex<BridgeState>,
    job_tx: Option<Sender<DeliveryJob>>,
    worker: Option<JoinHandle<()>>,
}

impl RelayBridge {
    pub fn new() -> Self {
        let (job_tx, job_rx) = crossbeam::channel::unbounded::<DeliveryJob>();
        let worker = std::thread::Builder::new()
            .name("tether-bridge".to_string())
            .spawn(move || {
                for job in job_rx {
                    for receiver in &job.targets {
                        receiver(&job.message);
                    }
                }
            })
            .expect("failed to spawn bridge worker");

        Self {
            state: Mutex::new(BridgeState {
                next_id: 1,
                receivers: HashMap::new(),
            }),
            job_tx: Some(job_tx),
            worker: Some(worker),
        }
    }

    /// Register a receiver for an action. Receivers for the same action are
    /// delivered to in registration order.
    pub fn register<F>(&self, action: &str, receiver: F) -> Result<ReceiverId, BridgeError>
    where
        F: Fn(&BridgeMessage) + Send + Sync + 'static,
    {
        let mut state = self.lock_state()?;
        let id = ReceiverId(state.next_id);
        state.next_id += 1;
        state
            .receivers
            .entry(action.to_string())
            .or_default()
            .push((id, Arc::new(receiver)));
        Ok(id)
    }

    /// Remove a receiver. Returns whether it was still registered.
    pub fn unregister(&self, id: ReceiverId) -> Result<bool, BridgeError> {
        let mut state = self.lock_state()?;
        for list in state.receivers.values_mut() {
            if let Some(position) = list.iter().position(|(entry_id, _)| *entry_id == id) {
                list.remove(position);
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn receiver_count(&self, action: &str) -> Result<usize, BridgeError> {
        let state = self.lock_state()?;
        Ok(state.receivers.get(action).map_or(0, Vec::len))
    }

    /// Queue delivery of a message to the receivers registered for its
    /// action. Lookup happens under the lock; delivery happens on the worker
    /// thread after this call returns.
    pub fn dispatch(&self, message: BridgeMessage) -> Result<(), BridgeError> {
        let targets: Vec<ReceiverFn> = {
            let state = self.lock_state()?;
            state
                .receivers
                .get(&message.action)
                .map(|list| list.iter().map(|(_, receiver)| receiver.clone()).collect())
                .unwrap_or_default()
        };

        if targets.is_empty() {
            tracing::debug!(action = %message.action, "no receivers for relayed action");
            return Ok(());
        }

        let Some(job_tx) = &self.job_tx else {
            return Err(BridgeError::Stopped);
        };
        job_tx
            .send(DeliveryJob { message, targets })
            .map_err(|_| BridgeError::Stopped)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, BridgeState>, BridgeError> {
        self.state.lock().map_err(|_| BridgeError::LockPoisoned)
    }
}

impl Default for RelayBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RelayBridge {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain queued deliveries and exit.
        self.job_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("bridge registry lock poisoned")]
    LockPoisoned,

    #[error("bridge worker stopped")]
    Stopped,
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::LockPoisoned => "lock_poisoned",
            BridgeError::Stopped => "bridge_stopped",
        }
    }

    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::core::TaggedValue;

    fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached within 1s");
    }

    #[test]
    fn delivers_to_receivers_in_registration_order() {
        let bridge = RelayBridge::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bridge
                .register("user_added", move |_| {
                    order.lock().unwrap().push(label);
                })
                .unwrap();
        }

        let mut args = ArgBag::new();
        args.insert("user_id".to_string(), TaggedValue::Int(10));
        bridge
            .dispatch(BridgeMessage::new("user_added", args))
            .unwrap();

        wait_for(|| order.lock().unwrap().len() == 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unregistered_receiver_stops_getting_messages() {
        let bridge = RelayBridge::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let id = bridge
            .register("tick", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        bridge
            .dispatch(BridgeMessage::new("tick", ArgBag::new()))
            .unwrap();
        wait_for(|| hits.load(Ordering::SeqCst) == 1);

        assert!(bridge.unregister(id).unwrap());
        assert!(!bridge.unregister(id).unwrap());
        assert_eq!(bridge.receiver_count("tick").unwrap(), 0);

        bridge
            .dispatch(BridgeMessage::new("tick", ArgBag::new()))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_without_receivers_is_a_noop() {
        let bridge = RelayBridge::new();
        bridge
            .dispatch(BridgeMessage::new("nobody_home", ArgBag::new()))
            .unwrap();
    }

    #[test]
    fn drop_drains_queued_deliveries() {
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let bridge = RelayBridge::new();
            let counter = Arc::clone(&hits);
            bridge
                .register("burst", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            for _ in 0..20 {
                bridge
                    .dispatch(BridgeMessage::new("burst", ArgBag::new()))
                    .unwrap();
            }
        }
        // Bridge dropped: worker must have drained everything first.
        assert_eq!(hits.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn slow_receiver_does_not_block_registration() {
        let bridge = RelayBridge::new();
        bridge
            .register("slow", |_| {
                std::thread::sleep(Duration::from_millis(100));
            })
            .unwrap();
        bridge
            .dispatch(BridgeMessage::new("slow", ArgBag::new()))
            .unwrap();

        // The worker is busy sleeping; the lock must still be free.
        let started = std::time::Instant::now();
        bridge.register("other", |_| {}).unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
