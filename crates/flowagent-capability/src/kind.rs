use std::fmt;

/// The closed set of capability variants.
///
/// Adding a variant means extending this enum and the registry table
/// together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
  Filesystem,
  Assistant,
  ComputerUse,
  WebSearch,
}

impl CapabilityKind {
  pub const ALL: [CapabilityKind; 4] = [
    CapabilityKind::Filesystem,
    CapabilityKind::Assistant,
    CapabilityKind::ComputerUse,
    CapabilityKind::WebSearch,
  ];

  /// The type tag used for this variant in plans.
  pub fn tag(&self) -> &'static str {
    match self {
      CapabilityKind::Filesystem => "filesystem",
      CapabilityKind::Assistant => "assistant",
      CapabilityKind::ComputerUse => "computeruse",
      CapabilityKind::WebSearch => "websearch",
    }
  }
}

impl fmt::Display for CapabilityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.tag())
  }
}
