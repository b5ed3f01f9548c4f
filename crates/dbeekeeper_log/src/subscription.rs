//! Per-client subscription registry and delivery.
//!
//! A client's live subscriber is a node in the substrate: registering one
//! bumps the client's generation there, so a subscription opened through any
//! handle supersedes one opened through another. Each handle additionally
//! owns a [`SubscriptionSlot`] whose re-entrant gate serializes its
//! callbacks with its own `subscribe` calls, which lets a receiver
//! resubscribe from inside its own callback. A delivery thread checks both
//! generations under the gate before every callback.

use crate::substrate::{Substrate, SubstrateError};
use dbeekeeper_core::{
    ClientError, ClientId, DbeelogError, DbeelogId, KeeperError, KeeperResult, LogEntry,
    TransactionId,
};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Callback receiving a subscription's transactions.
///
/// An `Err` is always the final invocation: the subscription has ended.
pub type Receiver = Box<dyn FnMut(KeeperResult<LogEntry>) + Send + 'static>;

/// The subscription state of one handle.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionSlot {
    generation: AtomicU64,
    gate: ReentrantMutex<()>,
}

impl SubscriptionSlot {
    /// Holds off this handle's deliveries until the guard is dropped.
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.gate.lock()
    }

    /// Invalidates the handle's current subscription and returns the new
    /// generation.
    pub(crate) fn register(&self) -> u64 {
        let _gate = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Ends the handle's current subscription without starting a new one.
    pub(crate) fn invalidate(&self) {
        self.register();
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// State of one delivery thread.
pub(crate) struct Delivery<S: Substrate + ?Sized> {
    pub(crate) substrate: Arc<S>,
    pub(crate) log: DbeelogId,
    pub(crate) client_id: ClientId,
    pub(crate) slot: Arc<SubscriptionSlot>,
    /// Generation within the handle's slot.
    pub(crate) generation: u64,
    /// Generation of the client's subscriber node in the substrate.
    pub(crate) node: u64,
    pub(crate) cursor: TransactionId,
    pub(crate) read_batch: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) receiver: Receiver,
}

impl<S: Substrate + ?Sized + 'static> Delivery<S> {
    /// Starts delivering on a dedicated thread.
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("dbeelog-{}-delivery", self.client_id))
            .spawn(move || self.run())
    }

    fn run(mut self) {
        debug!(
            client = %self.client_id,
            generation = self.node,
            from = %self.cursor,
            "subscription started"
        );
        loop {
            match self.is_current() {
                Ok(true) => {}
                Ok(false) => return self.superseded(),
                Err(e) => return self.fail(e),
            }

            let entries = match self
                .substrate
                .read(&self.log, self.cursor, self.read_batch.max(1))
            {
                Ok(entries) => entries,
                Err(e) => return self.fail(e),
            };

            if entries.is_empty() {
                if let Err(e) =
                    self.substrate
                        .wait_for_append(&self.log, self.cursor, self.poll_interval)
                {
                    return self.fail(e);
                }
                continue;
            }

            for entry in entries {
                let next = entry.id.next();
                match self.deliver(Ok(entry)) {
                    Ok(true) => self.cursor = next,
                    Ok(false) => return self.superseded(),
                    Err(e) => return self.fail(e),
                }
            }
        }
    }

    /// Whether this is still the client's live subscription.
    fn is_current(&self) -> Result<bool, SubstrateError> {
        if !self.slot.is_current(self.generation) {
            return Ok(false);
        }
        let live = self
            .substrate
            .subscriber_generation(&self.log, &self.client_id)?;
        Ok(live == self.node)
    }

    /// Hands one item to the receiver unless the subscription was superseded.
    fn deliver(&mut self, item: KeeperResult<LogEntry>) -> Result<bool, SubstrateError> {
        let slot = Arc::clone(&self.slot);
        let _gate = slot.lock();
        if !self.is_current()? {
            return Ok(false);
        }
        (self.receiver)(item);
        Ok(true)
    }

    fn superseded(&self) {
        debug!(client = %self.client_id, generation = self.node, "subscription superseded");
    }

    /// Delivers the terminal error of this subscription.
    fn fail(mut self, error: SubstrateError) {
        let error: KeeperError = match error {
            SubstrateError::Truncated { first, .. } => ClientError::Truncated {
                requested: self.cursor,
                first_retained: first,
            }
            .into(),
            other => DbeelogError::from(other).into(),
        };
        warn!(client = %self.client_id, %error, "subscription ended");

        let slot = Arc::clone(&self.slot);
        let _gate = slot.lock();
        // An unreachable substrate cannot confirm the node; the handle's own
        // generation decides.
        let current = match self.is_current() {
            Ok(current) => current,
            Err(_) => slot.is_current(self.generation),
        };
        if current {
            (self.receiver)(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySubstrate;
    use std::sync::mpsc;

    #[test]
    fn register_supersedes_previous_generation() {
        let slot = SubscriptionSlot::default();
        let first = slot.register();
        assert!(slot.is_current(first));

        let second = slot.register();
        assert!(!slot.is_current(first));
        assert!(slot.is_current(second));
    }

    #[test]
    fn register_while_holding_the_gate() {
        let slot = SubscriptionSlot::default();
        let first = slot.register();
        let _gate = slot.lock();
        let second = slot.register();
        assert!(slot.is_current(second));
        assert!(!slot.is_current(first));
    }

    fn delivery(
        substrate: &Arc<MemorySubstrate>,
        slot: &Arc<SubscriptionSlot>,
        client: &str,
        receiver: Receiver,
    ) -> Delivery<MemorySubstrate> {
        let log = DbeelogId::new("test");
        let client_id = ClientId::new(client);
        let node = substrate.register_subscriber(&log, &client_id).unwrap();
        Delivery {
            substrate: Arc::clone(substrate),
            log,
            client_id,
            slot: Arc::clone(slot),
            generation: slot.register(),
            node,
            cursor: TransactionId::new(1),
            read_batch: 16,
            poll_interval: Duration::from_millis(5),
            receiver,
        }
    }

    #[test]
    fn stale_node_is_not_delivered() {
        let substrate = Arc::new(MemorySubstrate::new());
        let slot = Arc::new(SubscriptionSlot::default());
        let (tx, rx) = mpsc::channel();
        let mut first = delivery(&substrate, &slot, "a", Box::new(move |d| {
            let _ = tx.send(d);
        }));
        assert!(first.deliver(Err(DbeelogError::Closed.into())).unwrap());

        // A second handle of the same client registers its own subscriber.
        let other_slot = Arc::new(SubscriptionSlot::default());
        let _second = delivery(&substrate, &other_slot, "a", Box::new(|_| {}));
        assert!(!first.deliver(Err(DbeelogError::Closed.into())).unwrap());
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn other_clients_do_not_supersede() {
        let substrate = Arc::new(MemorySubstrate::new());
        let slot = Arc::new(SubscriptionSlot::default());
        let mut a = delivery(&substrate, &slot, "a", Box::new(|_| {}));
        let other_slot = Arc::new(SubscriptionSlot::default());
        let _b = delivery(&substrate, &other_slot, "b", Box::new(|_| {}));
        assert!(a.is_current().unwrap());
        assert!(a.deliver(Err(DbeelogError::Closed.into())).unwrap());
    }
}
