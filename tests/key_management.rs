use std::sync::Arc;
use std::time::Duration;

use tokenvault::keys::store::KeyStore;
use tokenvault::models::key::KeyType;
use tokenvault::{DataKeyService, LocalKmsProvider, MasterKeyManager, MemoryKeyStore};

async fn stack() -> (Arc<MasterKeyManager>, Arc<DataKeyService>, Arc<MemoryKeyStore>) {
    let store = Arc::new(MemoryKeyStore::new());
    let master = Arc::new(MasterKeyManager::new(store.clone() as Arc<dyn KeyStore>));
    master.initialize().await.unwrap();
    let keys = Arc::new(
        DataKeyService::new(
            store.clone() as Arc<dyn KeyStore>,
            master.clone(),
            Arc::new(LocalKmsProvider::new()),
            Duration::from_secs(3600),
            7,
        )
        .await,
    );
    (master, keys, store)
}

#[tokio::test]
async fn data_keys_survive_scheduled_master_rotation() {
    let (master, keys, store) = stack().await;
    let generated = keys.generate_data_key(KeyType::DataEncryption).await.unwrap();

    master.rotate_master().await.unwrap();

    // Read through a cold cache so the unwrap actually runs: the old data
    // key stays wrapped under the retired master version.
    let cold = DataKeyService::new(
        store.clone() as Arc<dyn KeyStore>,
        master.clone(),
        Arc::new(LocalKmsProvider::new()),
        Duration::from_secs(3600),
        7,
    )
    .await;
    let fetched = cold.get_key(&generated.key_id).await.unwrap();
    assert_eq!(*generated.plaintext, *fetched);

    // New keys wrap under the new master version.
    let fresh = keys.generate_data_key(KeyType::DataEncryption).await.unwrap();
    let refetched = cold.get_key(&fresh.key_id).await.unwrap();
    assert_eq!(*fresh.plaintext, *refetched);
}

#[tokio::test]
async fn emergency_rotation_flushes_the_key_cache() {
    let (master, keys, store) = stack().await;
    let generated = keys.generate_data_key(KeyType::DataEncryption).await.unwrap();

    master.emergency_rotate().await.unwrap();

    // The cache was flushed: the next read has to reload from the store.
    // Prove it by corrupting the stored record; a warm cache would have
    // masked this.
    let mut record = store.get(&generated.key_id).await.unwrap().unwrap();
    record.encrypted_key_material.push('!');
    store.put(&record).await.unwrap();

    assert!(keys.get_key(&generated.key_id).await.is_err());
}

#[tokio::test]
async fn signing_pairs_recover_across_master_rotation() {
    let (master, keys, _) = stack().await;
    let pair = keys.generate_signing_key_pair().await.unwrap();

    master.emergency_rotate().await.unwrap();

    // Private key recovery re-derives the passphrase from the master
    // version that protected it.
    let recovered = keys.signing_private_pem(&pair.key_id).await.unwrap();
    assert_eq!(pair.private_pem.as_str(), recovered.as_str());

    let public = keys.signing_public_pem(&pair.key_id).await.unwrap();
    assert_eq!(pair.public_pem, public);
}
