use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::config::KmsBackend;
use crate::crypto::aes;
use crate::error::{AuthError, Result};
use crate::models::key::KeyType;

/// Source of raw symmetric key material.
///
/// Selected once at startup from configuration. A cloud-backed provider
/// failing at runtime is an error the caller sees, never a silent switch to
/// local generation.
#[async_trait]
pub trait KmsProvider: Send + Sync {
    /// Generates fresh key material for a key of the given type.
    async fn generate_key_material(&self, key_type: KeyType) -> Result<Zeroizing<Vec<u8>>>;

    /// A short label for logs.
    fn name(&self) -> &'static str;
}

/// Generates key material in-process from the OS CSPRNG.
#[derive(Default)]
pub struct LocalKmsProvider;

impl LocalKmsProvider {
    /// Creates a new `LocalKmsProvider`.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KmsProvider for LocalKmsProvider {
    async fn generate_key_material(&self, _key_type: KeyType) -> Result<Zeroizing<Vec<u8>>> {
        let mut material = Zeroizing::new(vec![0u8; aes::KEY_SIZE]);
        OsRng.fill_bytes(material.as_mut());
        Ok(material)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Resolves the configured provider.
///
/// The cloud backend's client is deployment-specific and injected by the
/// process wiring the services together; asking for it without supplying one
/// is a configuration error, not a cue to degrade to local generation.
pub fn resolve_provider(
    backend: KmsBackend,
    cloud: Option<std::sync::Arc<dyn KmsProvider>>,
) -> Result<std::sync::Arc<dyn KmsProvider>> {
    match backend {
        KmsBackend::Local => Ok(std::sync::Arc::new(LocalKmsProvider::new())),
        KmsBackend::Cloud => cloud.ok_or_else(|| {
            AuthError::Internal(
                "KMS_BACKEND=cloud requires a cloud provider to be supplied".to_string(),
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_provider_yields_unique_256_bit_keys() {
        let provider = LocalKmsProvider::new();

        let a = provider
            .generate_key_material(KeyType::DataEncryption)
            .await
            .unwrap();
        let b = provider
            .generate_key_material(KeyType::DataEncryption)
            .await
            .unwrap();

        assert_eq!(a.len(), aes::KEY_SIZE);
        assert_ne!(*a, *b);
    }

    #[test]
    fn cloud_backend_without_client_is_rejected() {
        assert!(resolve_provider(KmsBackend::Cloud, None).is_err());
    }
}
