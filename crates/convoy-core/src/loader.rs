//! 統合ローダー
//!
//! ファイル発見、環境変数補間、マージ、検証を統合してProjectを生成します。

use crate::error::{ComposeError, Result};
use crate::interpolate::{collect_variables, interpolate, load_env_file};
use crate::manifest::{
    ComposeFile, RawBuild, RawService, RawUlimit, RawVolumeMount,
};
use crate::model::{
    BuildConfig, DEFAULT_NETWORK, DependCondition, DependsOn, HealthCheck, Network, Project,
    PullPolicy, RestartPolicy, Service, ServiceNetwork, Ulimit, Volume, VolumeMount,
    normalize_project_name, parse_port_spec,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 既定で探索するマニフェストファイル名（先勝ち）
const MANIFEST_CANDIDATES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// ロードオプション
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// -f で明示指定されたマニフェスト（後のファイルが優先）
    pub files: Vec<PathBuf>,
    /// -p / --project-name
    pub project_name: Option<String>,
    /// プロジェクトディレクトリ（省略時はカレント）
    pub project_dir: Option<PathBuf>,
    /// 有効化するプロファイル
    pub profiles: Vec<String>,
}

/// マニフェストと環境からプロジェクトをロード
pub fn load_project(options: &LoadOptions) -> Result<Project> {
    let project_dir = match &options.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| ComposeError::IoError {
            path: PathBuf::from("."),
            message: e.to_string(),
        })?,
    };

    // 1. ファイル発見
    let files = discover_manifests(&project_dir, &options.files)?;
    debug!(count = files.len(), "Discovered manifest files");

    // 2. 変数収集（.env + プロセス環境、プロセス環境優先）
    let variables = collect_variables(&project_dir)?;

    // 3. 補間 → パース → マージ
    let mut merged = ComposeFile::default();
    for path in &files {
        let content = std::fs::read_to_string(path).map_err(|e| ComposeError::IoError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let rendered = interpolate(&content, &variables)?;
        let file: ComposeFile =
            serde_yaml::from_str(&rendered).map_err(|e| ComposeError::ManifestSyntax {
                path: path.clone(),
                message: e.to_string(),
            })?;
        merged.merge(file);
    }

    // 4. プロジェクト名の決定: フラグ > COMPOSE_PROJECT_NAME > ディレクトリ名
    let raw_name = options
        .project_name
        .clone()
        .or_else(|| variables.get("COMPOSE_PROJECT_NAME").cloned())
        .or_else(|| {
            project_dir
                .file_name()
                .and_then(|n| n.to_str())
                .map(String::from)
        })
        .unwrap_or_else(|| "default".to_string());
    let name = normalize_project_name(&raw_name);

    // 5. 正規化と検証
    let project = build_project(name, project_dir, variables, merged, &options.profiles)?;
    info!(
        project = %project.name,
        services = project.services.len(),
        networks = project.networks.len(),
        volumes = project.volumes.len(),
        "Project loaded"
    );
    Ok(project)
}

/// マニフェストファイルを発見する
///
/// 明示指定があればそれを使う。無ければ既定候補の先勝ち + `.override.` 派生。
fn discover_manifests(project_dir: &Path, explicit: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !explicit.is_empty() {
        for path in explicit {
            if !path.is_file() {
                return Err(ComposeError::IoError {
                    path: path.clone(),
                    message: "ファイルが存在しません".to_string(),
                });
            }
        }
        return Ok(explicit.to_vec());
    }

    for candidate in MANIFEST_CANDIDATES {
        let path = project_dir.join(candidate);
        if path.is_file() {
            let mut files = vec![path];
            // compose.yaml → compose.override.yaml
            let (stem, ext) = candidate.rsplit_once('.').unwrap();
            let override_path = project_dir.join(format!("{}.override.{}", stem, ext));
            if override_path.is_file() {
                files.push(override_path);
            }
            return Ok(files);
        }
    }

    Err(ComposeError::ManifestNotFound(project_dir.to_path_buf()))
}

/// 生データから検証済みProjectを構築
fn build_project(
    name: String,
    project_dir: PathBuf,
    variables: HashMap<String, String>,
    merged: ComposeFile,
    active_profiles: &[String],
) -> Result<Project> {
    let mut services = HashMap::new();
    for (service_name, raw) in merged.services {
        // プロファイル選択: profiles を持つサービスは有効化されない限り除外
        if !raw.profiles.is_empty()
            && !raw.profiles.iter().any(|p| active_profiles.contains(p))
        {
            debug!(service = %service_name, "Service excluded by profiles");
            continue;
        }
        let service = convert_service(&service_name, raw, &project_dir)?;
        services.insert(service_name, service);
    }

    let mut networks: HashMap<String, Network> = merged
        .networks
        .into_iter()
        .map(|(key, raw)| {
            let raw = raw.unwrap_or_default();
            let mut subnets = Vec::new();
            let mut gateway = None;
            if let Some(ipam) = raw.ipam {
                for config in ipam.config {
                    if let Some(subnet) = config.subnet {
                        subnets.push(subnet);
                    }
                    if gateway.is_none() {
                        gateway = config.gateway;
                    }
                }
            }
            (
                key,
                Network {
                    driver: raw.driver,
                    subnets,
                    gateway,
                    options: raw.driver_opts,
                    labels: raw.labels,
                    external: raw.external,
                },
            )
        })
        .collect();

    let volumes: HashMap<String, Volume> = merged
        .volumes
        .into_iter()
        .map(|(key, raw)| {
            let raw = raw.unwrap_or_default();
            (
                key,
                Volume {
                    driver: raw.driver,
                    driver_opts: raw.driver_opts,
                    labels: raw.labels,
                    external: raw.external,
                },
            )
        })
        .collect();

    // 暗黙の default ネットワーク
    let default_used = services.values().any(|s| {
        s.networks.is_empty() || s.networks.iter().any(|n| n.name == DEFAULT_NETWORK)
    });
    if default_used && !networks.contains_key(DEFAULT_NETWORK) {
        networks.insert(DEFAULT_NETWORK.to_string(), Network::default());
    }

    let project = Project {
        name,
        working_dir: project_dir,
        environment: variables,
        services,
        networks,
        volumes,
    };

    validate_project(&project)?;
    Ok(project)
}

fn convert_service(name: &str, raw: RawService, project_dir: &Path) -> Result<Service> {
    // env_file → environment（サービス定義のenvironmentが優先）
    let mut environment = HashMap::new();
    if let Some(env_files) = raw.env_file {
        for file in env_files.into_list() {
            let path = project_dir.join(file);
            environment.extend(load_env_file(&path)?);
        }
    }
    if let Some(env) = raw.environment {
        environment.extend(env.into_map());
    }

    let mut ports = Vec::new();
    for spec in &raw.ports {
        ports.extend(parse_port_spec(spec)?);
    }

    let mut volumes = Vec::new();
    for mount in raw.volumes {
        volumes.push(convert_volume_mount(mount)?);
    }

    let mut networks: Vec<ServiceNetwork> = raw
        .networks
        .map(|n| {
            n.into_attachments()
                .into_iter()
                .map(|(network_name, attachment)| ServiceNetwork {
                    name: network_name,
                    aliases: attachment.aliases,
                    ipv4_address: attachment.ipv4_address,
                })
                .collect()
        })
        .unwrap_or_default();
    networks.sort_by(|a, b| a.name.cmp(&b.name));

    let mut depends_on: Vec<DependsOn> = raw
        .depends_on
        .map(|d| {
            d.into_entries()
                .into_iter()
                .map(|(target, entry)| {
                    let condition = match entry.condition.as_deref() {
                        None => Ok(DependCondition::default()),
                        Some(text) => DependCondition::parse(text).ok_or_else(|| {
                            ComposeError::ManifestValidation(format!(
                                "サービス '{}' の depends_on 条件が不正です: {}",
                                name, text
                            ))
                        }),
                    }?;
                    Ok(DependsOn {
                        service: target,
                        condition,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    depends_on.sort_by(|a, b| a.service.cmp(&b.service));

    let healthcheck = raw.healthcheck.and_then(|h| {
        if h.disable {
            return None;
        }
        let test = h.test.map(|t| t.into_list()).unwrap_or_default();
        if test.first().map(String::as_str) == Some("NONE") {
            return None;
        }
        let defaults = HealthCheck::default();
        Some(HealthCheck {
            test,
            interval: h.interval.and_then(|d| d.as_secs()).unwrap_or(defaults.interval),
            timeout: h.timeout.and_then(|d| d.as_secs()).unwrap_or(defaults.timeout),
            retries: h.retries.unwrap_or(defaults.retries),
            start_period: h
                .start_period
                .and_then(|d| d.as_secs())
                .unwrap_or(defaults.start_period),
        })
    });

    let restart = match raw.restart.as_deref() {
        None => RestartPolicy::default(),
        Some(text) => RestartPolicy::parse(text)
            .ok_or_else(|| ComposeError::InvalidRestartPolicy(text.to_string()))?,
    };

    let pull_policy = match raw.pull_policy.as_deref() {
        None => PullPolicy::default(),
        Some(text) => PullPolicy::parse(text).ok_or_else(|| {
            ComposeError::ManifestValidation(format!(
                "サービス '{}' の pull_policy が不正です: {}",
                name, text
            ))
        })?,
    };

    let build = raw.build.map(|b| match b {
        RawBuild::Context(context) => BuildConfig {
            context: PathBuf::from(context),
            ..Default::default()
        },
        RawBuild::Detailed {
            context,
            dockerfile,
            args,
            target,
            cache_from,
            secrets,
        } => BuildConfig {
            context: PathBuf::from(context),
            dockerfile: dockerfile.map(PathBuf::from),
            args: args
                .into_iter()
                .map(|(k, v)| {
                    let rendered = v.map(|s| match s {
                        crate::manifest::EnvScalar::String(s) => s,
                        crate::manifest::EnvScalar::Bool(b) => b.to_string(),
                        crate::manifest::EnvScalar::Int(i) => i.to_string(),
                        crate::manifest::EnvScalar::Float(f) => f.to_string(),
                    });
                    (k, rendered.unwrap_or_default())
                })
                .collect(),
            target,
            cache_from,
            secrets,
        },
    });

    // deploy.replicas は scale の別名
    let scale = raw
        .scale
        .or(raw.deploy.and_then(|d| d.replicas))
        .unwrap_or(1);

    let stop_grace_period = match raw.stop_grace_period {
        None => 10,
        Some(duration) => duration.as_secs().ok_or_else(|| {
            ComposeError::ManifestValidation(format!(
                "サービス '{}' の stop_grace_period が不正です",
                name
            ))
        })?,
    };

    Ok(Service {
        image: raw.image,
        build,
        command: raw.command.map(|c| c.into_args()),
        entrypoint: raw.entrypoint.map(|e| e.into_args()),
        working_dir: raw.working_dir,
        user: raw.user,
        hostname: raw.hostname,
        environment,
        ports,
        volumes,
        networks,
        depends_on,
        healthcheck,
        restart,
        scale,
        profiles: raw.profiles,
        pull_policy,
        stop_grace_period,
        stop_signal: raw.stop_signal,
        init: raw.init.unwrap_or(false),
        privileged: raw.privileged.unwrap_or(false),
        read_only: raw.read_only.unwrap_or(false),
        tty: raw.tty.unwrap_or(false),
        stdin_open: raw.stdin_open.unwrap_or(false),
        cap_add: raw.cap_add,
        cap_drop: raw.cap_drop,
        security_opt: raw.security_opt,
        sysctls: raw.sysctls.map(|s| s.into_map()).unwrap_or_default(),
        tmpfs: raw.tmpfs.map(|t| t.into_list()).unwrap_or_default(),
        ulimits: raw
            .ulimits
            .into_iter()
            .map(|(k, v)| {
                let ulimit = match v {
                    RawUlimit::Single(n) => Ulimit { soft: n, hard: n },
                    RawUlimit::Pair { soft, hard } => Ulimit { soft, hard },
                };
                (k, ulimit)
            })
            .collect(),
    })
}

fn convert_volume_mount(mount: RawVolumeMount) -> Result<VolumeMount> {
    match mount {
        RawVolumeMount::Long {
            source,
            target,
            read_only,
        } => Ok(VolumeMount {
            source,
            target,
            read_only,
        }),
        RawVolumeMount::Short(spec) => {
            let parts: Vec<&str> = spec.split(':').collect();
            match parts.as_slice() {
                // ターゲットのみ（匿名ボリューム）
                [target] if !target.is_empty() => Ok(VolumeMount {
                    source: None,
                    target: target.to_string(),
                    read_only: false,
                }),
                [source, target] => Ok(VolumeMount {
                    source: Some(source.to_string()),
                    target: target.to_string(),
                    read_only: false,
                }),
                [source, target, mode] => {
                    let read_only = match *mode {
                        "ro" => true,
                        "rw" => false,
                        other => other.split(',').any(|m| m == "ro"),
                    };
                    Ok(VolumeMount {
                        source: Some(source.to_string()),
                        target: target.to_string(),
                        read_only,
                    })
                }
                _ => Err(ComposeError::InvalidVolume(spec)),
            }
        }
    }
}

/// ロード後の検証
///
/// 依存先の存在、循環、ネットワーク／ボリューム参照、image/buildの有無、
/// 成立し得ない依存条件を確認する。
fn validate_project(project: &Project) -> Result<()> {
    for (name, service) in &project.services {
        if service.image.is_none() && service.build.is_none() {
            return Err(ComposeError::MissingImage(name.clone()));
        }

        for dep in &service.depends_on {
            let target =
                project
                    .services
                    .get(&dep.service)
                    .ok_or_else(|| ComposeError::UnknownDependency {
                        service: name.clone(),
                        target: dep.service.clone(),
                    })?;

            // restart: always のサービスは「正常終了」し得ない
            if dep.condition == DependCondition::ServiceCompletedSuccessfully
                && target.restart == RestartPolicy::Always
            {
                return Err(ComposeError::ManifestValidation(format!(
                    "サービス '{}' は '{}' の service_completed_successfully を待ちますが、'{}' は restart: always のため成立しません",
                    name, dep.service, dep.service
                )));
            }
        }

        for network in &service.networks {
            if !project.networks.contains_key(&network.name) {
                return Err(ComposeError::ManifestValidation(format!(
                    "サービス '{}' が未定義のネットワーク '{}' を参照しています",
                    name, network.name
                )));
            }
        }

        for mount in &service.volumes {
            if let Some(volume_name) = mount.volume_name()
                && !project.volumes.contains_key(volume_name)
            {
                return Err(ComposeError::ManifestValidation(format!(
                    "サービス '{}' が未定義のボリューム '{}' を参照しています",
                    name, volume_name
                )));
            }
        }
    }

    detect_cycle(project)?;
    Ok(())
}

/// depends_on の循環を検出（DFS、経路付き）
fn detect_cycle(project: &Project) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        name: &str,
        project: &Project,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                // 経路から循環部分を切り出す
                let start = path.iter().position(|p| p == name).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].iter().map(String::as_str).collect();
                cycle.push(name);
                return Err(ComposeError::DependencyCycle(cycle.join(" -> ")));
            }
            Mark::Unvisited => {}
        }

        marks.insert(name.to_string(), Mark::InProgress);
        path.push(name.to_string());
        if let Some(service) = project.services.get(name) {
            for dep in &service.depends_on {
                visit(&dep.service, project, marks, path)?;
            }
        }
        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut names: Vec<&String> = project.services.keys().collect();
    names.sort();
    for name in names {
        visit(name, project, &mut marks, &mut Vec::new())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn load_from(dir: &Path) -> Result<Project> {
        load_project(&LoadOptions {
            project_dir: Some(dir.to_path_buf()),
            project_name: Some("testproj".to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_load_basic_project() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  web:
    image: "alpine:3.18"
    command: ["sleep", "60"]
"#,
        )
        .unwrap();

        let project = load_from(temp.path()).unwrap();
        assert_eq!(project.name, "testproj");
        assert_eq!(project.services.len(), 1);
        let web = &project.services["web"];
        assert_eq!(web.image.as_deref(), Some("alpine:3.18"));
        assert_eq!(
            web.command.as_deref(),
            Some(&["sleep".to_string(), "60".to_string()][..])
        );
        // 暗黙の default ネットワーク
        assert!(project.networks.contains_key("default"));
    }

    #[test]
    fn test_load_with_override_file() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  web:
    image: nginx:1.24
    ports: ["8080:80"]
"#,
        )
        .unwrap();
        fs::write(
            temp.path().join("compose.override.yaml"),
            r#"
services:
  web:
    image: nginx:1.25
    ports: ["8443:443"]
"#,
        )
        .unwrap();

        let project = load_from(temp.path()).unwrap();
        let web = &project.services["web"];
        assert_eq!(web.image.as_deref(), Some("nginx:1.25"));
        assert_eq!(web.ports.len(), 2);
    }

    #[test]
    fn test_cycle_rejected_at_load() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  a:
    image: alpine
    depends_on: [b]
  b:
    image: alpine
    depends_on: [a]
"#,
        )
        .unwrap();

        let err = load_from(temp.path()).unwrap_err();
        match err {
            ComposeError::DependencyCycle(path) => {
                assert!(path.contains(" -> "));
            }
            other => panic!("unexpected error: {other}"),
        }
        // ユーザー向けメッセージに cycle の語が含まれる
        assert!(
            ComposeError::DependencyCycle("a -> b -> a".into())
                .to_string()
                .contains("cycle")
        );
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  app:
    image: alpine
    depends_on: [ghost]
"#,
        )
        .unwrap();

        let err = load_from(temp.path()).unwrap_err();
        assert!(matches!(err, ComposeError::UnknownDependency { .. }));
    }

    #[test]
    fn test_missing_image_and_build_rejected() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  app:
    command: ["true"]
"#,
        )
        .unwrap();

        let err = load_from(temp.path()).unwrap_err();
        assert!(matches!(err, ComposeError::MissingImage(name) if name == "app"));
    }

    #[test]
    fn test_completed_successfully_with_restart_always_rejected() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  migrate:
    image: migrator
    restart: always
  app:
    image: alpine
    depends_on:
      migrate:
        condition: service_completed_successfully
"#,
        )
        .unwrap();

        let err = load_from(temp.path()).unwrap_err();
        assert!(matches!(err, ComposeError::ManifestValidation(_)));
    }

    #[test]
    fn test_profiles_exclude_services() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  web:
    image: nginx
  debugger:
    image: busybox
    profiles: [debug]
"#,
        )
        .unwrap();

        let without = load_from(temp.path()).unwrap();
        assert!(!without.services.contains_key("debugger"));

        let with = load_project(&LoadOptions {
            project_dir: Some(temp.path().to_path_buf()),
            project_name: Some("testproj".to_string()),
            profiles: vec!["debug".to_string()],
            ..Default::default()
        })
        .unwrap();
        assert!(with.services.contains_key("debugger"));
    }

    #[test]
    fn test_deploy_replicas_alias() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  web:
    image: nginx
    deploy:
      replicas: 3
"#,
        )
        .unwrap();

        let project = load_from(temp.path()).unwrap();
        assert_eq!(project.services["web"].scale, 3);
    }

    #[test]
    fn test_named_volume_must_be_declared() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  db:
    image: postgres:16
    volumes:
      - pgdata:/var/lib/postgresql/data
"#,
        )
        .unwrap();

        let err = load_from(temp.path()).unwrap_err();
        assert!(matches!(err, ComposeError::ManifestValidation(_)));

        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  db:
    image: postgres:16
    volumes:
      - pgdata:/var/lib/postgresql/data
volumes:
  pgdata:
"#,
        )
        .unwrap();
        let project = load_from(temp.path()).unwrap();
        assert!(project.volumes.contains_key("pgdata"));
    }

    #[test]
    fn test_interpolation_from_env_file() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join(".env"), "NGINX_TAG=1.25\n").unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            r#"
services:
  web:
    image: "nginx:${NGINX_TAG}"
"#,
        )
        .unwrap();

        let project = load_from(temp.path()).unwrap();
        assert_eq!(
            project.services["web"].image.as_deref(),
            Some("nginx:1.25")
        );
    }
}
