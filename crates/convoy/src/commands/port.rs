use crate::docker;
use convoy_compose::{OrchestratorError, Result};
use convoy_core::Project;

pub async fn handle(
    project: &Project,
    service: &str,
    container_port: u16,
    index: u32,
) -> Result<()> {
    if !project.services.contains_key(service) {
        return Err(convoy_core::ComposeError::ServiceNotFound(service.to_string()).into());
    }

    let gateway = docker::connect_gateway().await?;
    let container_name = project.container_name(service, index);
    let inspect = gateway.inspect_container(&container_name).await?;

    let ports = inspect
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref());

    // tcpを先に、見つからなければudp
    for proto in ["tcp", "udp"] {
        let key = format!("{}/{}", container_port, proto);
        if let Some(Some(bindings)) = ports.and_then(|p| p.get(&key))
            && let Some(binding) = bindings.first()
        {
            println!(
                "{}:{}",
                binding.host_ip.as_deref().unwrap_or("0.0.0.0"),
                binding.host_port.as_deref().unwrap_or("")
            );
            return Ok(());
        }
    }

    Err(OrchestratorError::UnitFailed {
        service: service.to_string(),
        reason: format!(
            "ポート {} はコンテナ '{}' で公開されていません",
            container_port, container_name
        ),
    })
}
