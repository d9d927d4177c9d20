use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Subscribers are only woken when the value actually flips.
#[derive(Debug, Clone)]
pub struct NetworkObserver {
    sender: Arc<watch::Sender<bool>>,
}

impl NetworkObserver {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> NetworkSubscription {
        NetworkSubscription {
            receiver: self.sender.subscribe(),
        }
    }
}

#[derive(Debug)]
pub struct NetworkSubscription {
    receiver: watch::Receiver<bool>,
}

impl NetworkSubscription {
    pub fn current(&self) -> bool {
        *self.receiver.borrow()
    }

    // None once the observer is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.receiver.changed().await.ok()?;
        Some(*self.receiver.borrow_and_update())
    }
}
