use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::network::NetworkObserver;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

// Any HTTP response counts as online.
#[derive(Debug, Clone)]
pub struct HttpConnectivityProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpConnectivityProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(err) => {
                debug!(url = %self.url, error = %err, "connectivity probe failed");
                false
            }
        }
    }
}

pub fn spawn_probe_loop(
    observer: NetworkObserver,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = probe.check().await;
            observer.set_online(online);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Scripted(AtomicBool);

    #[async_trait]
    impl ConnectivityProbe for Scripted {
        async fn check(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn probe_results_reach_observer() {
        let observer = NetworkObserver::new(false);
        let probe = Arc::new(Scripted(AtomicBool::new(true)));
        let mut subscription = observer.subscribe();

        let task = spawn_probe_loop(observer.clone(), probe.clone(), Duration::from_millis(10));
        let online = tokio::time::timeout(Duration::from_secs(1), subscription.changed())
            .await
            .expect("probe tick");
        assert_eq!(online, Some(true));

        probe.0.store(false, Ordering::SeqCst);
        let online = tokio::time::timeout(Duration::from_secs(1), subscription.changed())
            .await
            .expect("probe tick");
        assert_eq!(online, Some(false));

        task.abort();
    }

    #[tokio::test]
    async fn unreachable_url_reads_offline() {
        let probe = HttpConnectivityProbe::new("http://127.0.0.1:9/health", Duration::from_secs(1))
            .expect("client");
        assert!(!probe.check().await);
    }
}
