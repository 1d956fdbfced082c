use convoy_compose::{OrchestratorError, Result};
use convoy_core::{Network, Project, Service, Volume};
use serde::Serialize;
use std::collections::BTreeMap;

/// マージ・補間・検証済みの実効マニフェスト
///
/// 出力を決定的にするためキー順に並べ替える。
#[derive(Serialize)]
struct RenderedConfig<'a> {
    name: &'a str,
    services: BTreeMap<&'a str, &'a Service>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    networks: BTreeMap<&'a str, &'a Network>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<&'a str, &'a Volume>,
}

pub fn handle(project: &Project) -> Result<()> {
    let rendered = RenderedConfig {
        name: &project.name,
        services: project
            .services
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect(),
        networks: project
            .networks
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect(),
        volumes: project
            .volumes
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect(),
    };

    let yaml = serde_yaml::to_string(&rendered).map_err(|e| {
        OrchestratorError::Compose(convoy_core::ComposeError::ManifestValidation(format!(
            "マニフェストの出力に失敗しました: {}",
            e
        )))
    })?;
    print!("{}", yaml);
    Ok(())
}
