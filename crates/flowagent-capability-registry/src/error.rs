use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
  #[error("unknown capability type '{tag}'")]
  UnknownCapabilityType { tag: String },
}
