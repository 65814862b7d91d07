use flowagent_config::CapabilitySettings;
use minijinja::{Environment, context};

use crate::error::CapabilityError;
use crate::kind::CapabilityKind;

const FILESYSTEM_INSTRUCTIONS: &str = "Use the tools to read the filesystem and answer questions \
  based on those files. Only attempt to read files under {{ root }}.";

const ASSISTANT_INSTRUCTIONS: &str =
  "You are an assistant agent. Think and reason over the text and images you are given.";

const COMPUTER_USE_INSTRUCTIONS: &str = "You operate a computer to accomplish generic tasks such \
  as browsing the web, searching for information or using any application. Decide which tool \
  accomplishes each part of the task. Files are available under {{ root }}.";

const WEB_SEARCH_INSTRUCTIONS: &str =
  "You search the web and report what you find. Cite the pages you relied on.";

const MARKDOWN_DIRECTIVE: &str = " Result should follow markdown syntax.";

/// The agent definition behind one capability variant.
///
/// Profiles carry no tools of their own: a tool reaches the model only when a
/// connected [`ToolServer`](crate::ToolServer) lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
  pub kind: CapabilityKind,
  pub instructions: String,
}

impl AgentProfile {
  /// Build the profile for `kind`, rendering its instructions against the
  /// capability settings.
  pub fn for_kind(
    kind: CapabilityKind,
    settings: &CapabilitySettings,
  ) -> Result<Self, CapabilityError> {
    let template = match kind {
      CapabilityKind::Filesystem => FILESYSTEM_INSTRUCTIONS,
      CapabilityKind::Assistant => ASSISTANT_INSTRUCTIONS,
      CapabilityKind::ComputerUse => COMPUTER_USE_INSTRUCTIONS,
      CapabilityKind::WebSearch => WEB_SEARCH_INSTRUCTIONS,
    };

    let root = settings.filesystem_root.display().to_string();
    let rendered = Environment::new()
      .render_str(template, context! { root => root })
      .map_err(|e| CapabilityError::Template {
        capability: kind.tag().to_string(),
        message: e.to_string(),
      })?;

    Ok(Self {
      kind,
      instructions: format!("{}{}", rendered, MARKDOWN_DIRECTIVE),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  #[test]
  fn test_filesystem_profile_injects_root() {
    let settings = CapabilitySettings {
      filesystem_root: PathBuf::from("/srv/expenses"),
      filesystem_server: None,
    };

    let profile = AgentProfile::for_kind(CapabilityKind::Filesystem, &settings).unwrap();
    assert!(profile.instructions.contains("Only attempt to read files under /srv/expenses."));
  }

  #[test]
  fn test_every_profile_asks_for_markdown() {
    let settings = CapabilitySettings::default();
    for kind in CapabilityKind::ALL {
      let profile = AgentProfile::for_kind(kind, &settings).unwrap();
      assert_eq!(profile.kind, kind);
      assert!(profile.instructions.ends_with("Result should follow markdown syntax."));
      assert!(!profile.instructions.contains("{{"));
    }
  }
}
