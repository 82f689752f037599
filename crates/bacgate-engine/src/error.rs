use bacgate_device::RegistryError;
use bacgate_store::StoreError;
use thiserror::Error;

/// A failure while applying a decoded event to the store or registry.
///
/// Apply failures NAK the event for redelivery; because every sink
/// operation is idempotent, replaying an already-applied event is
/// harmless.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
}
