//! コンテナ設定のフィンガープリント
//!
//! 実効コンテナ設定の正規化JSONをSHA-256でハッシュします。
//! このハッシュが変更検知の一次シグナルになります。

use crate::model::{Project, Service};
use sha2::{Digest, Sha256};

/// サービスの実効設定からconfig-hashを計算
///
/// レプリカ間で共通（indexは含めない）。環境変数やマップ類は
/// キー順に正規化されるため、同じ設定なら常に同じハッシュになる。
pub fn config_hash(project: &Project, service_name: &str, service: &Service) -> String {
    let image = service.image_ref(&project.name, service_name);
    let value = serde_json::json!({
        "image": image,
        "service": service_name,
        "command": service.command,
        "entrypoint": service.entrypoint,
        "working_dir": service.working_dir,
        "user": service.user,
        "hostname": service.hostname,
        "environment": service.environment,
        "ports": service.ports,
        "volumes": service.volumes,
        "networks": service.networks.iter().map(|n| &n.name).collect::<Vec<_>>(),
        "healthcheck": service.healthcheck,
        "restart": service.restart,
        "stop_grace_period": service.stop_grace_period,
        "stop_signal": service.stop_signal,
        "init": service.init,
        "privileged": service.privileged,
        "read_only": service.read_only,
        "tty": service.tty,
        "stdin_open": service.stdin_open,
        "cap_add": service.cap_add,
        "cap_drop": service.cap_drop,
        "security_opt": service.security_opt,
        "sysctls": service.sysctls,
        "tmpfs": service.tmpfs,
        "ulimits": service.ulimits,
    });

    let canonical = canonicalize(&value);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// JSON値をキー順で決定的に文字列化
fn canonicalize(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Project;

    fn project() -> Project {
        Project {
            name: "myapp".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_is_stable() {
        let service = Service {
            image: Some("nginx:1.25".to_string()),
            ..Default::default()
        };
        let first = config_hash(&project(), "web", &service);
        let second = config_hash(&project(), "web", &service);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_hash_changes_with_image() {
        let before = Service {
            image: Some("nginx:1.24".to_string()),
            ..Default::default()
        };
        let after = Service {
            image: Some("nginx:1.25".to_string()),
            ..Default::default()
        };
        assert_ne!(
            config_hash(&project(), "web", &before),
            config_hash(&project(), "web", &after)
        );
    }

    #[test]
    fn test_hash_ignores_env_insertion_order() {
        let mut left = Service {
            image: Some("alpine".to_string()),
            ..Default::default()
        };
        left.environment.insert("A".into(), "1".into());
        left.environment.insert("B".into(), "2".into());

        let mut right = Service {
            image: Some("alpine".to_string()),
            ..Default::default()
        };
        right.environment.insert("B".into(), "2".into());
        right.environment.insert("A".into(), "1".into());

        assert_eq!(
            config_hash(&project(), "web", &left),
            config_hash(&project(), "web", &right)
        );
    }

    #[test]
    fn test_hash_differs_per_service_name() {
        let service = Service {
            image: Some("alpine".to_string()),
            ..Default::default()
        };
        assert_ne!(
            config_hash(&project(), "one", &service),
            config_hash(&project(), "two", &service)
        );
    }
}
