//! Runtime Gateway
//!
//! デーモンAPIを話す唯一のモジュール。composerの他の部分はこの
//! ファサード越しにのみコンテナ・ネットワーク・ボリューム・イメージを
//! 操作する。読み取り系は一時的エラーをバックオフ付きでリトライし、
//! 変更系はリトライしない。

// Bollard 0.19.4 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::error::{GatewayError, Result};
use base64::Engine;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, ContainerSummary, ContainerTopResponse,
    HealthStatusEnum, Ipam, IpamConfig, NetworkCreateRequest, VolumeCreateOptions,
};
use convoy_core::{Network, PullPolicy, Volume};
use futures_util::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// 読み取り系リトライの試行回数
const READ_RETRY_ATTEMPTS: u32 = 3;
/// リトライの初期待機（ミリ秒）、2倍ずつ伸びる
const READ_RETRY_BASE_MS: u64 = 200;

/// タスク状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Unknown,
}

/// ヘルスチェック状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    None,
    Starting,
    Healthy,
    Unhealthy,
}

/// デーモンへのファサード
#[derive(Clone)]
pub struct Gateway {
    docker: Docker,
}

/// 読み取り系の共通リトライ（指数バックオフ）
async fn retry_read<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, bollard::errors::Error>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let mapped: GatewayError = err.into();
                if mapped.is_transient() && attempt + 1 < READ_RETRY_ATTEMPTS {
                    let delay = READ_RETRY_BASE_MS * 2u64.pow(attempt);
                    debug!(attempt, delay_ms = delay, "Transient daemon error, retrying read");
                    sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                } else {
                    return Err(mapped);
                }
            }
        }
    }
}

impl Gateway {
    /// ローカルデーモンに接続して疎通確認
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| GatewayError::ConnectionFailed(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| GatewayError::ConnectionFailed(e.to_string()))?;
        Ok(Self { docker })
    }

    /// テスト用に既存接続を包む
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    // ---- コンテナ: 読み取り ----

    /// ラベルフィルタでコンテナを列挙
    pub async fn list_containers(
        &self,
        label_filters: &[String],
        all: bool,
    ) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        if !label_filters.is_empty() {
            filters.insert("label".to_string(), label_filters.to_vec());
        }
        retry_read(|| {
            let options = ListContainersOptions {
                all,
                filters: filters.clone(),
                ..Default::default()
            };
            self.docker.list_containers(Some(options))
        })
        .await
    }

    pub async fn inspect_container(&self, name: &str) -> Result<ContainerInspectResponse> {
        retry_read(|| {
            self.docker
                .inspect_container(name, None::<InspectContainerOptions>)
        })
        .await
        .map_err(|e| match e {
            GatewayError::Permanent(msg) if msg.contains("not found") => {
                GatewayError::ContainerNotFound(name.to_string())
            }
            other => other,
        })
    }

    /// タスク状態の取得
    pub async fn task_status(&self, name: &str) -> Result<TaskStatus> {
        let inspect = self.inspect_container(name).await?;
        let status = inspect
            .state
            .as_ref()
            .and_then(|s| s.status)
            .unwrap_or(ContainerStateStatusEnum::EMPTY);
        Ok(match status {
            ContainerStateStatusEnum::CREATED => TaskStatus::Created,
            ContainerStateStatusEnum::RUNNING | ContainerStateStatusEnum::RESTARTING => {
                TaskStatus::Running
            }
            ContainerStateStatusEnum::PAUSED => TaskStatus::Paused,
            ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::DEAD => {
                TaskStatus::Stopped
            }
            _ => TaskStatus::Unknown,
        })
    }

    /// ヘルスチェック状態の取得
    pub async fn inspect_health(&self, name: &str) -> Result<HealthState> {
        let inspect = self.inspect_container(name).await?;
        let health = inspect
            .state
            .as_ref()
            .and_then(|s| s.health.as_ref())
            .and_then(|h| h.status);
        Ok(match health {
            Some(HealthStatusEnum::STARTING) => HealthState::Starting,
            Some(HealthStatusEnum::HEALTHY) => HealthState::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => HealthState::Unhealthy,
            _ => HealthState::None,
        })
    }

    /// 終了コードの取得（停止済みコンテナ）
    pub async fn exit_code(&self, name: &str) -> Result<i64> {
        let inspect = self.inspect_container(name).await?;
        Ok(inspect
            .state
            .as_ref()
            .and_then(|s| s.exit_code)
            .unwrap_or(-1))
    }

    /// コンテナ内プロセス一覧
    pub async fn top(&self, name: &str) -> Result<ContainerTopResponse> {
        retry_read(|| {
            self.docker
                .top_processes(name, None::<bollard::container::TopOptions<String>>)
        })
        .await
    }

    // ---- コンテナ: 変更 ----

    /// コンテナ作成。名前衝突は AlreadyExists
    pub async fn create_container(
        &self,
        name: &str,
        config: Config<String>,
    ) -> Result<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 409, ..
                } => GatewayError::AlreadyExists(name.to_string()),
                other => other.into(),
            })?;
        debug!(container = name, id = %response.id, "Container created");
        Ok(response.id)
    }

    pub async fn start_container(&self, name: &str) -> Result<()> {
        match self
            .docker
            .start_container(name, None::<bollard::query_parameters::StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: 既に起動済み。冪等に成功扱い
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(GatewayError::ContainerNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// 停止。デーモン側が stop_signal → 猶予 → SIGKILL を行う。
    /// 304（既に停止）は成功扱い。
    pub async fn stop_container(&self, name: &str, timeout_secs: u64) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(GatewayError::ContainerNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn kill_container(&self, name: &str, signal: &str) -> Result<()> {
        self.docker
            .kill_container(name, Some(KillContainerOptions { signal }))
            .await
            .map_err(Into::into)
    }

    pub async fn pause_container(&self, name: &str) -> Result<()> {
        self.docker.pause_container(name).await.map_err(Into::into)
    }

    pub async fn unpause_container(&self, name: &str) -> Result<()> {
        self.docker
            .unpause_container(name)
            .await
            .map_err(Into::into)
    }

    pub async fn restart_container(&self, name: &str) -> Result<()> {
        self.docker
            .restart_container(
                name,
                None::<bollard::query_parameters::RestartContainerOptions>,
            )
            .await
            .map_err(Into::into)
    }

    /// コンテナ削除。`volumes` で所有する匿名ボリュームも削除
    pub async fn remove_container(&self, name: &str, force: bool, volumes: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: volumes,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// タスクの終了を待ち、終了コードを返す
    pub async fn wait_container(&self, name: &str) -> Result<i64> {
        let mut stream = self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // デーモンは非0終了をエラーフレームで返すことがある
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => self.exit_code(name).await,
        }
    }

    /// ログストリーム（logmux用）
    pub fn logs_stream(
        &self,
        name: &str,
        follow: bool,
        tail: Option<usize>,
        timestamps: bool,
    ) -> impl Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            timestamps,
            ..Default::default()
        };
        self.docker.logs(name, Some(options))
    }

    /// exec を実行し、出力を標準出力/標準エラーへ流して終了コードを返す
    pub async fn exec_streamed(
        &self,
        container: &str,
        cmd: Vec<String>,
        user: Option<String>,
        env: Vec<String>,
        interactive: bool,
        tty: bool,
        detach: bool,
    ) -> Result<i64> {
        use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};

        let exec_config = CreateExecOptions {
            cmd: Some(cmd),
            user,
            env: if env.is_empty() { None } else { Some(env) },
            attach_stdin: Some(interactive),
            attach_stdout: Some(!detach),
            attach_stderr: Some(!detach),
            tty: Some(tty),
            ..Default::default()
        };
        let message = self.docker.create_exec(container, exec_config).await?;

        let start_config = StartExecOptions {
            detach,
            ..Default::default()
        };
        match self.docker.start_exec(&message.id, Some(start_config)).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            print!("{}", String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            eprint!("{}", String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdIn { .. }) => {}
                        Err(e) => {
                            warn!(error = %e, "Exec stream error");
                            break;
                        }
                    }
                }
            }
            StartExecResults::Detached => return Ok(0),
        }

        let inspect = self.docker.inspect_exec(&message.id).await?;
        Ok(inspect.exit_code.unwrap_or(0))
    }

    // ---- イメージ ----

    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// イメージをpull（進捗は一行上書きで表示）
    pub async fn pull_image(&self, image: &str, quiet: bool) -> Result<()> {
        let (image_name, tag) = parse_image_tag(image);
        let credentials = extract_registry(image).and_then(get_docker_credentials);

        let options = bollard::image::CreateImageOptions {
            from_image: image_name,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, credentials);

        while let Some(info) = stream.next().await {
            match info {
                Ok(bollard::models::CreateImageInfo {
                    status: Some(status),
                    progress,
                    ..
                }) => {
                    if !quiet {
                        use std::io::Write;
                        match progress {
                            Some(progress) => print!("\r  ↓ {}: {}", status, progress),
                            None => print!("\r  ↓ {}                    ", status),
                        }
                        let _ = std::io::stdout().flush();
                    }
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    ..
                }) => {
                    if !quiet {
                        println!();
                    }
                    return Err(GatewayError::ImageNotFound(image.to_string()));
                }
                Err(e) => {
                    if !quiet {
                        println!();
                    }
                    return Err(e.into());
                }
                _ => {}
            }
        }
        if !quiet {
            println!();
        }
        Ok(())
    }

    /// pull_policy に従ってイメージを用意
    pub async fn ensure_image(&self, image: &str, policy: PullPolicy, quiet: bool) -> Result<()> {
        match policy {
            PullPolicy::Always => self.pull_image(image, quiet).await,
            PullPolicy::Missing => {
                if self.image_exists(image).await? {
                    Ok(())
                } else {
                    self.pull_image(image, quiet).await
                }
            }
            PullPolicy::Never => {
                if self.image_exists(image).await? {
                    Ok(())
                } else {
                    Err(GatewayError::ImageNotFound(image.to_string()))
                }
            }
        }
    }

    pub async fn push_image(&self, image: &str) -> Result<()> {
        let credentials = extract_registry(image).and_then(get_docker_credentials);
        let (image_name, tag) = parse_image_tag(image);
        let options = bollard::image::PushImageOptions { tag };
        let mut stream = self.docker.push_image(image_name, Some(options), credentials);
        while let Some(info) = stream.next().await {
            if let Err(e) = info {
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub async fn list_images(&self) -> Result<Vec<bollard::models::ImageSummary>> {
        retry_read(|| {
            self.docker
                .list_images(None::<bollard::image::ListImagesOptions<String>>)
        })
        .await
    }

    // ---- ネットワーク ----

    /// ネットワーク inspect（無ければ None）
    pub async fn inspect_network(
        &self,
        name: &str,
    ) -> Result<Option<bollard::models::Network>> {
        match self
            .docker
            .inspect_network(
                name,
                None::<bollard::network::InspectNetworkOptions<String>>,
            )
            .await
        {
            Ok(network) => Ok(Some(network)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_network(
        &self,
        name: &str,
        spec: &Network,
        labels: HashMap<String, String>,
    ) -> Result<()> {
        let ipam = if spec.subnets.is_empty() {
            None
        } else {
            Some(Ipam {
                config: Some(
                    spec.subnets
                        .iter()
                        .map(|subnet| IpamConfig {
                            subnet: Some(subnet.clone()),
                            gateway: spec.gateway.clone(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            })
        };

        let request = NetworkCreateRequest {
            name: name.to_string(),
            driver: Some(spec.driver.clone().unwrap_or_else(|| "bridge".to_string())),
            options: Some(spec.options.clone()),
            labels: Some(labels),
            ipam,
            ..Default::default()
        };

        match self.docker.create_network(request).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Err(GatewayError::AlreadyExists(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove_network(&self, name: &str) -> Result<()> {
        match self.docker.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ---- ボリューム ----

    pub async fn inspect_volume(&self, name: &str) -> Result<Option<bollard::models::Volume>> {
        match self.docker.inspect_volume(name).await {
            Ok(volume) => Ok(Some(volume)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_volume(
        &self,
        name: &str,
        spec: &Volume,
        labels: HashMap<String, String>,
    ) -> Result<()> {
        let options = VolumeCreateOptions {
            name: Some(name.to_string()),
            driver: spec.driver.clone(),
            driver_opts: Some(spec.driver_opts.clone()),
            labels: Some(labels),
            ..Default::default()
        };
        self.docker.create_volume(options).await?;
        Ok(())
    }

    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        match self
            .docker
            .remove_volume(name, None::<bollard::volume::RemoveVolumeOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// プロジェクト所有のボリュームを列挙
    pub async fn list_volumes(&self, label_filter: &str) -> Result<Vec<bollard::models::Volume>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label_filter.to_string()]);
        let response = retry_read(|| {
            let options = bollard::volume::ListVolumesOptions {
                filters: filters.clone(),
            };
            self.docker.list_volumes(Some(options))
        })
        .await?;
        debug!(filter = label_filter, "Listed volumes");
        Ok(response.volumes.unwrap_or_default())
    }

    // ---- ファイル転送（cp用） ----

    pub async fn download_from_container(&self, name: &str, path: &str) -> Result<Vec<u8>> {
        let options = bollard::container::DownloadFromContainerOptions { path };
        let mut stream = self.docker.download_from_container(name, Some(options));
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes)
    }

    pub async fn upload_to_container(&self, name: &str, path: &str, tar: Vec<u8>) -> Result<()> {
        let options = bollard::container::UploadToContainerOptions {
            path,
            ..Default::default()
        };
        self.docker
            .upload_to_container(name, Some(options), bollard::body_full(tar.into()))
            .await
            .map_err(Into::into)
    }

    /// ビルドAPIへの生アクセス（builder用）
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

/// イメージ名とタグを分離
/// 例: "redis:7-alpine" -> ("redis", "7-alpine")
///     "postgres" -> ("postgres", "latest")
pub fn parse_image_tag(image: &str) -> (&str, &str) {
    // レジストリのポート区切り（localhost:5000）を誤認しないよう、
    // 最後の / より後ろにある : だけをタグ区切りとみなす
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(offset) => {
            let idx = name_start + offset;
            (&image[..idx], &image[idx + 1..])
        }
        None => (image, "latest"),
    }
}

/// イメージ名からレジストリを抽出
pub fn extract_registry(image: &str) -> Option<&str> {
    // ghcr.io/owner/repo:tag のような形式。最初の / の前がレジストリ
    if image.contains('/') {
        let first = image.split('/').next().unwrap_or_default();
        // レジストリは . または : を含む（例: ghcr.io, localhost:5000）
        if first.contains('.') || first.contains(':') {
            return Some(first);
        }
    }
    None
}

/// Docker config.json からレジストリの認証情報を取得
pub fn get_docker_credentials(registry: &str) -> Option<bollard::auth::DockerCredentials> {
    let home = std::env::var("HOME").ok()?;
    let config_path = format!("{}/.docker/config.json", home);
    let config_content = std::fs::read_to_string(&config_path).ok()?;
    let config: serde_json::Value = serde_json::from_str(&config_content).ok()?;

    let auths = config.get("auths")?.as_object()?;
    let auth_entry = auths.get(registry)?;
    let auth_b64 = auth_entry.get("auth")?.as_str()?;

    // Base64 デコード (username:password 形式)
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64)
        .ok()?;
    let auth_str = String::from_utf8(decoded).ok()?;
    let (username, password) = auth_str.split_once(':')?;

    Some(bollard::auth::DockerCredentials {
        username: Some(username.to_string()),
        password: Some(password.to_string()),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_tag() {
        assert_eq!(parse_image_tag("redis:7-alpine"), ("redis", "7-alpine"));
        assert_eq!(parse_image_tag("postgres"), ("postgres", "latest"));
        assert_eq!(
            parse_image_tag("ghcr.io/owner/app:v1"),
            ("ghcr.io/owner/app", "v1")
        );
        assert_eq!(
            parse_image_tag("localhost:5000/app"),
            ("localhost:5000/app", "latest")
        );
    }

    #[test]
    fn test_extract_registry() {
        assert_eq!(extract_registry("ghcr.io/owner/app"), Some("ghcr.io"));
        assert_eq!(extract_registry("localhost:5000/app"), Some("localhost:5000"));
        assert_eq!(extract_registry("nginx"), None);
        assert_eq!(extract_registry("library/nginx"), None);
    }
}
