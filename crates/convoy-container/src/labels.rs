//! コンテナラベル
//!
//! convoyが作成する全リソースの所有権記録。down / ps はこのラベルで
//! フィルタする。

use convoy_core::Project;
use std::collections::HashMap;

pub const PROJECT: &str = "com.project";
pub const SERVICE: &str = "com.service";
pub const REPLICA_INDEX: &str = "com.replica-index";
pub const CONFIG_HASH: &str = "com.config-hash";
pub const ONE_OFF: &str = "com.one-off";
pub const DEPENDENCIES: &str = "com.dependencies";

/// `label=...` 形式のフィルタ文字列
pub fn project_filter(project_name: &str) -> String {
    format!("{}={}", PROJECT, project_name)
}

pub fn service_filter(service_name: &str) -> String {
    format!("{}={}", SERVICE, service_name)
}

/// レプリカコンテナに付与するラベル一式
pub fn container_labels(
    project: &Project,
    service_name: &str,
    index: u32,
    config_hash: &str,
    one_off: bool,
) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(PROJECT.to_string(), project.name.clone());
    labels.insert(SERVICE.to_string(), service_name.to_string());
    labels.insert(REPLICA_INDEX.to_string(), index.to_string());
    labels.insert(CONFIG_HASH.to_string(), config_hash.to_string());
    labels.insert(ONE_OFF.to_string(), one_off.to_string());

    if let Some(service) = project.services.get(service_name) {
        let mut deps: Vec<&str> = service
            .depends_on
            .iter()
            .map(|d| d.service.as_str())
            .collect();
        deps.sort();
        labels.insert(DEPENDENCIES.to_string(), deps.join(","));
    }

    labels
}

/// ネットワーク／ボリュームに付与する所有ラベル
pub fn resource_labels(project_name: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(PROJECT.to_string(), project_name.to_string());
    labels.insert(ONE_OFF.to_string(), "false".to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{DependsOn, Service};

    #[test]
    fn test_container_labels_complete() {
        let mut project = Project {
            name: "myapp".to_string(),
            ..Default::default()
        };
        project.services.insert(
            "app".to_string(),
            Service {
                image: Some("alpine".to_string()),
                depends_on: vec![
                    DependsOn {
                        service: "db".to_string(),
                        condition: Default::default(),
                    },
                    DependsOn {
                        service: "cache".to_string(),
                        condition: Default::default(),
                    },
                ],
                ..Default::default()
            },
        );

        let labels = container_labels(&project, "app", 2, "abc123", false);
        assert_eq!(labels[PROJECT], "myapp");
        assert_eq!(labels[SERVICE], "app");
        assert_eq!(labels[REPLICA_INDEX], "2");
        assert_eq!(labels[CONFIG_HASH], "abc123");
        assert_eq!(labels[ONE_OFF], "false");
        assert_eq!(labels[DEPENDENCIES], "cache,db");
    }

    #[test]
    fn test_project_filter_format() {
        assert_eq!(project_filter("myapp"), "com.project=myapp");
    }
}
