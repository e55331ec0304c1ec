use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::keys::service::DataKeyService;

/// Timer-driven rotation of all active keys.
///
/// Runs independently of request handling; the only locks it touches are the
/// single cache reads/writes inside `DataKeyService`. Cancelled at shutdown
/// via the token handed to `spawn`.
pub struct RotationScheduler {
    keys: Arc<DataKeyService>,
    interval: Duration,
}

impl RotationScheduler {
    /// Creates a scheduler that sweeps every `interval`.
    pub fn new(keys: Arc<DataKeyService>, interval: Duration) -> Self {
        Self { keys, interval }
    }

    /// Spawns the rotation loop. Returns its handle; the loop exits when
    /// `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "✅ Key rotation scheduler started (every {:?})",
                self.interval
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("🧹 Key rotation scheduler stopped");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        tracing::info!("🔑 Running scheduled key rotation sweep...");
                        match self.keys.rotate_all().await {
                            Ok(summary) => {
                                tracing::info!(
                                    "✅ Rotation sweep completed: {} rotated, {} failed",
                                    summary.rotated,
                                    summary.failed
                                );
                            }
                            Err(e) => {
                                tracing::error!("❌ Rotation sweep failed: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::master::MasterKeyManager;
    use crate::keys::provider::LocalKmsProvider;
    use crate::keys::store::{KeyStore, MemoryKeyStore};
    use crate::models::key::KeyType;

    #[tokio::test]
    async fn sweep_fires_and_cancellation_stops_the_loop() {
        let store = Arc::new(MemoryKeyStore::new());
        let master = Arc::new(MasterKeyManager::new(store.clone() as Arc<dyn KeyStore>));
        master.initialize().await.unwrap();
        let keys = Arc::new(
            DataKeyService::new(
                store.clone() as Arc<dyn KeyStore>,
                master,
                Arc::new(LocalKmsProvider::new()),
                Duration::from_secs(3600),
                7,
            )
            .await,
        );
        let original = keys.generate_data_key(KeyType::DataEncryption).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = RotationScheduler::new(keys.clone(), Duration::from_millis(20))
            .spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let record = store.get(&original.key_id).await.unwrap().unwrap();
        assert!(!record.metadata.is_active);
    }
}
