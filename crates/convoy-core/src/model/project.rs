//! プロジェクト定義

use super::network::Network;
use super::service::Service;
use super::volume::Volume;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// ロード済みプロジェクト
///
/// マニフェストと環境から一度だけ構築され、以後は不変。
/// プロジェクト名は作成する全リソース名のプレフィックスになる。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    /// DNS-1123 ラベルに正規化済みの名前
    pub name: String,
    pub working_dir: PathBuf,
    /// 補間に使った実効環境
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub services: HashMap<String, Service>,
    #[serde(default)]
    pub networks: HashMap<String, Network>,
    #[serde(default)]
    pub volumes: HashMap<String, Volume>,
}

impl Project {
    /// レプリカのコンテナ名: `<project>_<service>_<index>`
    pub fn container_name(&self, service: &str, index: u32) -> String {
        format!("{}_{}_{}", self.name, service, index)
    }

    /// ネットワークのデーモン側名称: `<project>_<key>`
    ///
    /// external なネットワークはキーをそのまま使う。
    pub fn network_name(&self, key: &str) -> String {
        match self.networks.get(key) {
            Some(network) if network.external => key.to_string(),
            _ => format!("{}_{}", self.name, key),
        }
    }

    /// ボリュームのデーモン側名称: `<project>_<key>`
    pub fn volume_name(&self, key: &str) -> String {
        match self.volumes.get(key) {
            Some(volume) if volume.external => key.to_string(),
            _ => format!("{}_{}", self.name, key),
        }
    }

    /// サービス名をソート済みで返す（決定的な出力用）
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }
}

/// プロジェクト名を DNS-1123 ラベルに正規化
///
/// 英数字とハイフン以外は落とし、小文字化、先頭末尾のハイフンを除去、
/// 63文字に切り詰める。
pub fn normalize_project_name(raw: &str) -> String {
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else if c == '_' || c == '.' || c == ' ' {
                '-'
            } else {
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect();

    while name.starts_with('-') {
        name.remove(0);
    }
    while name.ends_with('-') {
        name.pop();
    }
    name.truncate(63);

    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_project_name() {
        assert_eq!(normalize_project_name("MyApp"), "myapp");
        assert_eq!(normalize_project_name("my_app.dev"), "my-app-dev");
        assert_eq!(normalize_project_name("--web--"), "web");
        assert_eq!(normalize_project_name("日本語"), "default");
        assert_eq!(normalize_project_name("app 2"), "app-2");
    }

    #[test]
    fn test_container_name_format() {
        let project = Project {
            name: "myapp".to_string(),
            ..Default::default()
        };
        assert_eq!(project.container_name("web", 1), "myapp_web_1");
        assert_eq!(project.container_name("db", 3), "myapp_db_3");
    }

    #[test]
    fn test_resource_names_respect_external() {
        let mut project = Project {
            name: "myapp".to_string(),
            ..Default::default()
        };
        project.networks.insert(
            "backbone".to_string(),
            Network {
                external: true,
                ..Default::default()
            },
        );
        project
            .networks
            .insert("default".to_string(), Network::default());

        assert_eq!(project.network_name("backbone"), "backbone");
        assert_eq!(project.network_name("default"), "myapp_default");
        assert_eq!(project.volume_name("pgdata"), "myapp_pgdata");
    }
}
