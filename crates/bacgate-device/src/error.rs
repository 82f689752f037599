use bacgate_core::{ObjectType, ValueKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("object {object_type}:{instance} not found")]
    NotFound {
        object_type: ObjectType,
        instance: u32,
    },
    #[error(
        "value tag {offered:?} does not match {object_type}:{instance} declared as {declared:?}"
    )]
    TypeMismatch {
        object_type: ObjectType,
        instance: u32,
        declared: ValueKind,
        offered: Option<ValueKind>,
    },
    #[error("write to {object_type}:{instance} rejected by the write hook")]
    WriteDenied {
        object_type: ObjectType,
        instance: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CovError {
    #[error("subscription table full ({0} active)")]
    Capacity(usize),
    #[error("monitored object {0}:{1} does not exist")]
    TargetMissing(ObjectType, u32),
}
