//! Callback-style consumers running on their own task

use std::fmt::Display;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::{Delivery, EventFilter, NotificationBus, SubscriptionId};

/// Handle to a spawned listener task
#[derive(Debug)]
pub struct ListenerHandle {
    id: SubscriptionId,
    task: JoinHandle<u64>,
}

impl ListenerHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop the listener immediately
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the listener to finish (bus closed or unsubscribed) and
    /// return how many deliveries its handler rejected.
    pub async fn join(self) -> u64 {
        self.task.await.unwrap_or_default()
    }
}

impl NotificationBus {
    /// Run `handler` for every matching delivery on a dedicated task.
    ///
    /// Handler errors are logged and counted; they never reach the publisher
    /// or stop the listener.
    pub fn spawn_listener<F, E>(&self, filter: EventFilter, mut handler: F) -> ListenerHandle
    where
        F: FnMut(Delivery) -> Result<(), E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut subscription = self.subscribe(filter);
        let id = subscription.id();
        let task = tokio::spawn(async move {
            let mut failures = 0u64;
            while let Some(delivery) = subscription.recv().await {
                if let Err(e) = handler(delivery) {
                    failures += 1;
                    warn!(subscription = %id, error = %e, failures, "listener handler failed");
                }
            }
            failures
        });
        ListenerHandle { id, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use ferry_core::{ContentId, NotificationEvent};

    #[tokio::test]
    async fn test_handler_errors_stay_local() {
        let bus = NotificationBus::new();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);

        let listener = bus.spawn_listener(EventFilter::all(), move |_delivery| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err("handler rejected event")
            } else {
                Ok(())
            }
        });

        for i in 0..4u8 {
            assert_eq!(bus.publish(NotificationEvent::content_added(ContentId::new(vec![i]))), 1);
        }
        bus.close();

        assert_eq!(listener.join().await, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }
}
