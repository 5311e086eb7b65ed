//! Configuration sources and the queue that carries their actions to the reconciler.

pub(crate) mod file;
pub(crate) mod store;
pub(crate) mod wire;

use tokio::sync::mpsc;

use crate::config::Action;

pub(crate) use store::{ConfigStore, StoreError};
pub(crate) use wire::Layout;

pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Producer side of the action queue. Sends wait while the queue is full.
pub(crate) type ActionSender = mpsc::Sender<Action>;
pub(crate) type ActionReceiver = mpsc::Receiver<Action>;

pub(crate) fn channel(capacity: usize) -> (ActionSender, ActionReceiver) {
    mpsc::channel(capacity.max(1))
}
