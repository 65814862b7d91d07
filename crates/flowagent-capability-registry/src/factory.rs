use std::sync::Arc;

use async_trait::async_trait;
use flowagent_capability::{
  AgentCapability, AgentProfile, Capability, CapabilityError, CapabilityKind, ToolServer,
};
use flowagent_config::CapabilitySettings;
use flowagent_model::ModelBackend;
use tracing::info;

/// Builds capability instances for resolved kinds.
#[async_trait]
pub trait CapabilityFactory: Send + Sync {
  async fn construct(
    &self,
    kind: CapabilityKind,
    step_name: &str,
  ) -> Result<Box<dyn Capability>, CapabilityError>;
}

/// The production factory: every variant is an [`AgentCapability`] talking to
/// a shared model backend. Filesystem steps additionally connect to the
/// configured MCP tool server and use its tools.
pub struct BackendCapabilityFactory {
  backend: Arc<dyn ModelBackend>,
  settings: CapabilitySettings,
  model: Option<String>,
}

impl BackendCapabilityFactory {
  pub fn new(backend: Arc<dyn ModelBackend>, settings: CapabilitySettings) -> Self {
    Self {
      backend,
      settings,
      model: None,
    }
  }

  /// Model used for every capability instead of the backend's default.
  pub fn with_model(mut self, model: Option<String>) -> Self {
    self.model = model;
    self
  }
}

#[async_trait]
impl CapabilityFactory for BackendCapabilityFactory {
  async fn construct(
    &self,
    kind: CapabilityKind,
    step_name: &str,
  ) -> Result<Box<dyn Capability>, CapabilityError> {
    let profile = AgentProfile::for_kind(kind, &self.settings)?;
    let mut capability = AgentCapability::new(step_name, profile, self.backend.clone())
      .with_model(self.model.clone());

    if kind == CapabilityKind::Filesystem
      && let Some(server) = &self.settings.filesystem_server
    {
      let server = ToolServer::spawn(server, &self.settings.filesystem_root).await?;
      capability = capability.with_tool_server(server);
    }

    info!(
      step = %step_name,
      kind = %kind,
      tools = capability.tool_server().map_or(0, |server| server.tools().len()),
      "capability_constructed"
    );
    Ok(Box::new(capability))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowagent_config::Message;
  use flowagent_model::EchoBackend;

  use crate::registry::resolve;

  #[tokio::test]
  async fn test_constructs_named_capability_of_resolved_kind() {
    let factory =
      BackendCapabilityFactory::new(Arc::new(EchoBackend::new()), CapabilitySettings::default());

    let constructor = resolve("websearch").unwrap();
    let mut capability = constructor.construct(&factory, "lookup").await.unwrap();
    assert_eq!(capability.name(), "lookup");
    assert_eq!(capability.kind(), CapabilityKind::WebSearch);

    let reply = capability.execute(vec![Message::user("rust")]).await.unwrap();
    assert_eq!(reply.content, "echo: rust");
    capability.release().await.unwrap();
  }

  #[tokio::test]
  async fn test_filesystem_tool_server_spawn_failure_is_capability_error() {
    let settings = CapabilitySettings {
      filesystem_server: Some(flowagent_config::ToolServerSettings {
        command: "flowagent-no-such-tool-server".to_string(),
        args: vec!["{{ root }}".to_string()],
      }),
      ..CapabilitySettings::default()
    };
    let factory = BackendCapabilityFactory::new(Arc::new(EchoBackend::new()), settings);

    let result = factory.construct(CapabilityKind::Filesystem, "s1").await;
    assert!(matches!(result, Err(CapabilityError::ToolServerSpawn { .. })));

    // Other kinds never touch the tool server.
    assert!(factory.construct(CapabilityKind::Assistant, "s2").await.is_ok());
  }
}
