use flowagent_capability::{Capability, CapabilityError, CapabilityKind};

use crate::error::RegistryError;
use crate::factory::CapabilityFactory;

const TABLE: [(&str, CapabilityKind); 4] = [
  ("filesystem", CapabilityKind::Filesystem),
  ("assistant", CapabilityKind::Assistant),
  ("computeruse", CapabilityKind::ComputerUse),
  ("websearch", CapabilityKind::WebSearch),
];

/// A resolved constructor for one capability variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityConstructor {
  kind: CapabilityKind,
}

impl CapabilityConstructor {
  pub fn kind(&self) -> CapabilityKind {
    self.kind
  }

  /// Build the capability for the step named `step_name`.
  ///
  /// This is the scoped acquisition point: any external resource the variant
  /// needs is acquired here and owned by the returned capability.
  pub async fn construct(
    &self,
    factory: &dyn CapabilityFactory,
    step_name: &str,
  ) -> Result<Box<dyn Capability>, CapabilityError> {
    factory.construct(self.kind, step_name).await
  }
}

/// Resolve a type tag. Tags are matched exactly.
pub fn resolve(tag: &str) -> Result<CapabilityConstructor, RegistryError> {
  TABLE
    .iter()
    .find(|(known, _)| *known == tag)
    .map(|(_, kind)| CapabilityConstructor { kind: *kind })
    .ok_or_else(|| RegistryError::UnknownCapabilityType {
      tag: tag.to_string(),
    })
}

/// Every tag the registry accepts.
pub fn tags() -> impl Iterator<Item = &'static str> {
  TABLE.iter().map(|(tag, _)| *tag)
}
