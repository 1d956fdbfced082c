//! Service から Docker API パラメータへの変換

// Bollard 0.19.4 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::labels;
use bollard::container::{Config, NetworkingConfig};
use bollard::models::{
    EndpointIpamConfig, EndpointSettings, HealthConfig, HostConfig, PortBinding, ResourcesUlimits,
    RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use convoy_core::{Project, RestartPolicy, Service};
use std::collections::HashMap;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// ServiceをDockerのコンテナ設定に変換
///
/// 返り値はそのまま create_container に渡せる。one_off は run 由来の
/// 使い捨てコンテナの印。
pub fn service_to_container_config(
    project: &Project,
    service_name: &str,
    service: &Service,
    index: u32,
    config_hash: &str,
    one_off: bool,
) -> Config<String> {
    let image = service.image_ref(&project.name, service_name);

    // 環境変数（キー順で決定的に）
    let mut env: Vec<String> = service
        .environment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    env.sort();

    // ポートバインディング
    let mut port_bindings = HashMap::new();
    let mut exposed_ports = HashMap::new();
    for port in &service.ports {
        let container_port = format!("{}/{}", port.container, port.protocol.as_str());
        exposed_ports.insert(container_port.clone(), HashMap::new());

        let host_ip = port.host_ip.as_deref().unwrap_or("0.0.0.0");
        port_bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some(host_ip.to_string()),
                host_port: Some(port.host.to_string()),
            }]),
        );
    }

    // ボリューム: バインドと名前付きは binds、匿名は volumes マップ
    let mut binds = Vec::new();
    let mut anonymous = HashMap::new();
    for mount in &service.volumes {
        let mode = if mount.read_only { "ro" } else { "rw" };
        match &mount.source {
            None => {
                anonymous.insert(mount.target.clone(), HashMap::new());
            }
            Some(source) if mount.is_bind() => {
                // 相対パスはプロジェクトディレクトリ基準で絶対化
                let host_path = if source.starts_with('/') {
                    source.clone()
                } else {
                    project.working_dir.join(source).display().to_string()
                };
                binds.push(format!("{}:{}:{}", host_path, mount.target, mode));
            }
            Some(source) => {
                binds.push(format!(
                    "{}:{}:{}",
                    project.volume_name(source),
                    mount.target,
                    mode
                ));
            }
        }
    }

    // tmpfs マウント
    let tmpfs: HashMap<String, String> = service
        .tmpfs
        .iter()
        .map(|target| (target.clone(), String::new()))
        .collect();

    // 再起動ポリシー
    let restart_policy = match service.restart {
        RestartPolicy::No => None,
        policy => Some(DockerRestartPolicy {
            name: Some(match policy {
                RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
                RestartPolicy::OnFailure { .. } => RestartPolicyNameEnum::ON_FAILURE,
                RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
                RestartPolicy::No => RestartPolicyNameEnum::NO,
            }),
            maximum_retry_count: policy.max_retries().map(|n| n as i64),
        }),
    };

    // ulimits
    let ulimits: Vec<ResourcesUlimits> = {
        let mut keys: Vec<&String> = service.ulimits.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|name| {
                let ulimit = service.ulimits[name];
                ResourcesUlimits {
                    name: Some(name.clone()),
                    soft: Some(ulimit.soft),
                    hard: Some(ulimit.hard),
                }
            })
            .collect()
    };

    // ネットワーク接続（サービス名 + 定義されたエイリアス）
    let mut endpoints = HashMap::new();
    let attachments: Vec<_> = if service.networks.is_empty() {
        vec![convoy_core::ServiceNetwork {
            name: convoy_core::DEFAULT_NETWORK.to_string(),
            ..Default::default()
        }]
    } else {
        service.networks.clone()
    };
    let primary_network = project.network_name(&attachments[0].name);
    for attachment in &attachments {
        let mut aliases = vec![service_name.to_string()];
        aliases.extend(attachment.aliases.iter().cloned());
        endpoints.insert(
            project.network_name(&attachment.name),
            EndpointSettings {
                aliases: Some(aliases),
                ipam_config: attachment.ipv4_address.as_ref().map(|address| {
                    EndpointIpamConfig {
                        ipv4_address: Some(address.clone()),
                        ..Default::default()
                    }
                }),
                ..Default::default()
            },
        );
    }

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(binds),
        network_mode: Some(primary_network),
        restart_policy,
        init: service.init.then_some(true),
        privileged: service.privileged.then_some(true),
        readonly_rootfs: service.read_only.then_some(true),
        cap_add: (!service.cap_add.is_empty()).then(|| service.cap_add.clone()),
        cap_drop: (!service.cap_drop.is_empty()).then(|| service.cap_drop.clone()),
        security_opt: (!service.security_opt.is_empty()).then(|| service.security_opt.clone()),
        sysctls: (!service.sysctls.is_empty()).then(|| service.sysctls.clone()),
        tmpfs: (!tmpfs.is_empty()).then_some(tmpfs),
        ulimits: (!ulimits.is_empty()).then_some(ulimits),
        ..Default::default()
    };

    // ヘルスチェック
    let healthcheck = service.healthcheck.as_ref().map(|check| HealthConfig {
        test: Some(check.test.clone()),
        interval: Some(check.interval as i64 * NANOS_PER_SEC),
        timeout: Some(check.timeout as i64 * NANOS_PER_SEC),
        retries: Some(check.retries as i64),
        start_period: Some(check.start_period as i64 * NANOS_PER_SEC),
        ..Default::default()
    });

    Config {
        image: Some(image),
        cmd: service.command.clone(),
        entrypoint: service.entrypoint.clone(),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        volumes: (!anonymous.is_empty()).then_some(anonymous),
        working_dir: service.working_dir.clone(),
        user: service.user.clone(),
        hostname: service.hostname.clone(),
        tty: service.tty.then_some(true),
        open_stdin: service.stdin_open.then_some(true),
        stop_signal: service.stop_signal.clone(),
        stop_timeout: Some(service.stop_grace_period as i64),
        healthcheck,
        host_config: Some(host_config),
        labels: Some(labels::container_labels(
            project,
            service_name,
            index,
            config_hash,
            one_off,
        )),
        networking_config: Some(NetworkingConfig {
            endpoints_config: endpoints,
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{HealthCheck, PortMapping, Protocol, VolumeMount};

    fn project() -> Project {
        Project {
            name: "vantage".to_string(),
            working_dir: "/work/vantage".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_basic_config() {
        let service = Service {
            image: Some("postgres:16".to_string()),
            ..Default::default()
        };
        let config = service_to_container_config(&project(), "db", &service, 1, "hash", false);

        assert_eq!(config.image, Some("postgres:16".to_string()));
        let labels = config.labels.unwrap();
        assert_eq!(labels["com.project"], "vantage");
        assert_eq!(labels["com.service"], "db");
        assert_eq!(labels["com.replica-index"], "1");
        assert_eq!(labels["com.config-hash"], "hash");
        assert_eq!(labels["com.one-off"], "false");
    }

    #[test]
    fn test_ports_and_bindings() {
        let service = Service {
            image: Some("web".to_string()),
            ports: vec![
                PortMapping {
                    host: 8080,
                    container: 3000,
                    protocol: Protocol::Tcp,
                    host_ip: None,
                },
                PortMapping {
                    host: 5432,
                    container: 5432,
                    protocol: Protocol::Tcp,
                    host_ip: Some("127.0.0.1".to_string()),
                },
            ],
            ..Default::default()
        };
        let config = service_to_container_config(&project(), "web", &service, 1, "h", false);

        let exposed = config.exposed_ports.unwrap();
        assert!(exposed.contains_key("3000/tcp"));
        assert!(exposed.contains_key("5432/tcp"));

        let bindings = config.host_config.unwrap().port_bindings.unwrap();
        let binding = bindings["3000/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port, Some("8080".to_string()));
        assert_eq!(binding[0].host_ip, Some("0.0.0.0".to_string()));
        let bound = bindings["5432/tcp"].as_ref().unwrap();
        assert_eq!(bound[0].host_ip, Some("127.0.0.1".to_string()));
    }

    #[test]
    fn test_volume_mount_forms() {
        let mut proj = project();
        proj.volumes
            .insert("pgdata".to_string(), Default::default());
        let service = Service {
            image: Some("postgres:16".to_string()),
            volumes: vec![
                VolumeMount {
                    source: Some("/data".to_string()),
                    target: "/var/lib/data".to_string(),
                    read_only: false,
                },
                VolumeMount {
                    source: Some("./conf".to_string()),
                    target: "/etc/conf".to_string(),
                    read_only: true,
                },
                VolumeMount {
                    source: Some("pgdata".to_string()),
                    target: "/var/lib/postgresql/data".to_string(),
                    read_only: false,
                },
                VolumeMount {
                    source: None,
                    target: "/scratch".to_string(),
                    read_only: false,
                },
            ],
            ..Default::default()
        };
        let config = service_to_container_config(&proj, "db", &service, 1, "h", false);

        let host_config = config.host_config.unwrap();
        let binds = host_config.binds.unwrap();
        assert!(binds.contains(&"/data:/var/lib/data:rw".to_string()));
        assert!(binds.contains(&"/work/vantage/./conf:/etc/conf:ro".to_string()));
        assert!(binds.contains(&"vantage_pgdata:/var/lib/postgresql/data:rw".to_string()));

        // 匿名ボリュームは volumes マップへ
        assert!(config.volumes.unwrap().contains_key("/scratch"));
    }

    #[test]
    fn test_restart_policy_mapping() {
        let service = Service {
            image: Some("worker".to_string()),
            restart: RestartPolicy::OnFailure {
                max_retries: Some(3),
            },
            ..Default::default()
        };
        let config = service_to_container_config(&project(), "worker", &service, 1, "h", false);
        let policy = config.host_config.unwrap().restart_policy.unwrap();
        assert_eq!(policy.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(policy.maximum_retry_count, Some(3));

        let none = Service {
            image: Some("job".to_string()),
            ..Default::default()
        };
        let config = service_to_container_config(&project(), "job", &none, 1, "h", false);
        assert!(config.host_config.unwrap().restart_policy.is_none());
    }

    #[test]
    fn test_healthcheck_nanos() {
        let service = Service {
            image: Some("db".to_string()),
            healthcheck: Some(HealthCheck {
                test: vec!["CMD".to_string(), "pg_isready".to_string()],
                interval: 5,
                timeout: 3,
                retries: 4,
                start_period: 10,
            }),
            ..Default::default()
        };
        let config = service_to_container_config(&project(), "db", &service, 1, "h", false);
        let health = config.healthcheck.unwrap();
        assert_eq!(health.interval, Some(5_000_000_000));
        assert_eq!(health.timeout, Some(3_000_000_000));
        assert_eq!(health.retries, Some(4));
    }

    #[test]
    fn test_default_network_alias() {
        let service = Service {
            image: Some("api".to_string()),
            ..Default::default()
        };
        let config = service_to_container_config(&project(), "api", &service, 1, "h", false);

        let networking = config.networking_config.unwrap();
        let endpoint = &networking.endpoints_config["vantage_default"];
        assert!(
            endpoint
                .aliases
                .as_ref()
                .unwrap()
                .contains(&"api".to_string())
        );
        let host_config = config.host_config.unwrap();
        assert_eq!(host_config.network_mode, Some("vantage_default".to_string()));
    }

    #[test]
    fn test_stop_settings() {
        let service = Service {
            image: Some("app".to_string()),
            stop_signal: Some("SIGINT".to_string()),
            stop_grace_period: 25,
            ..Default::default()
        };
        let config = service_to_container_config(&project(), "app", &service, 1, "h", false);
        assert_eq!(config.stop_signal, Some("SIGINT".to_string()));
        assert_eq!(config.stop_timeout, Some(25));
    }
}
