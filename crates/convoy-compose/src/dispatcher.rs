//! ワークディスパッチャ
//!
//! スケジューラのノード一つ分のユニット（ensure-network /
//! build-or-pull / create / start / stop / remove / attach-logs）を
//! ゲートウェイ越しに実行します。各ユニットは冪等で、変更系RPCの前に
//! 必ずキャンセルトークンを確認します。

use crate::cache::ArtifactCache;
use crate::error::{OrchestratorError, Result};
use crate::logmux::LogMultiplexer;
use crate::scheduler::Action;
use async_trait::async_trait;
use convoy_build::{ContextBuilder, ImageBuilder, build_fingerprint};
use convoy_container::{
    CancelToken, Gateway, GatewayError, labels, waiter, walker,
};
use convoy_core::{DependCondition, Project, Service, config_hash};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// エッジ待機のデフォルトタイムアウト（秒）
const DEFAULT_EDGE_TIMEOUT_SECS: u64 = 60;

/// ディスパッチャの振る舞いを決めるオプション
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// up -d（ログを繋がない）
    pub detach: bool,
    /// ビルド設定があってもビルドしない
    pub no_build: bool,
    /// イメージがあってもビルドし直す（--build）
    pub force_build: bool,
    /// config-hashが一致しても作り直す
    pub force_recreate: bool,
    /// kill のシグナル
    pub kill_signal: String,
    /// stop猶予時間の上書き（秒）
    pub timeout_override: Option<u64>,
    /// --scale SERVICE=N の上書き
    pub scale_overrides: HashMap<String, u32>,
    /// エッジ条件待機のタイムアウト（秒）
    pub edge_timeout_secs: u64,
    /// pull進捗を表示しない
    pub quiet_pull: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            detach: false,
            no_build: false,
            force_build: false,
            force_recreate: false,
            kill_signal: "SIGKILL".to_string(),
            timeout_override: None,
            scale_overrides: HashMap::new(),
            edge_timeout_secs: DEFAULT_EDGE_TIMEOUT_SECS,
            quiet_pull: false,
        }
    }
}

/// スケジューラから見たユニット実行の継ぎ目
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn run_unit(&self, service: &str, action: Action, cancel: &CancelToken) -> Result<()>;

    async fn wait_edge(
        &self,
        dependency: &str,
        condition: DependCondition,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// ゲートウェイに対して実際のユニットを実行するディスパッチャ
pub struct WorkDispatcher {
    project: Arc<Project>,
    gateway: Gateway,
    cache: ArtifactCache,
    options: DispatchOptions,
    logmux: Option<Arc<LogMultiplexer>>,
}

impl WorkDispatcher {
    pub fn new(
        project: Arc<Project>,
        gateway: Gateway,
        options: DispatchOptions,
        logmux: Option<Arc<LogMultiplexer>>,
    ) -> Self {
        Self {
            project,
            gateway,
            cache: ArtifactCache::new(),
            options,
            logmux,
        }
    }

    fn service(&self, name: &str) -> Result<&Service> {
        self.project.services.get(name).ok_or_else(|| {
            OrchestratorError::Compose(convoy_core::ComposeError::ServiceNotFound(
                name.to_string(),
            ))
        })
    }

    /// スケール値（--scale上書きを反映）
    pub fn scale_of(&self, name: &str, service: &Service) -> u32 {
        self.options
            .scale_overrides
            .get(name)
            .copied()
            .unwrap_or(service.scale)
    }

    fn stop_timeout(&self, service: &Service) -> u64 {
        self.options
            .timeout_override
            .unwrap_or(service.stop_grace_period)
    }

    /// サービスの既存レプリカをindex降順で返す
    async fn existing_replicas(&self, name: &str) -> Result<Vec<(u32, String)>> {
        let filters = [
            labels::project_filter(&self.project.name),
            labels::service_filter(name),
        ];
        let summaries = self.gateway.list_containers(&filters, true).await?;
        let mut replicas: Vec<(u32, String)> = summaries
            .iter()
            .map(walker::ContainerRef::from_summary)
            .filter(|c| c.labels.get(labels::ONE_OFF).map(String::as_str) != Some("true"))
            .map(|c| {
                let index = c
                    .labels
                    .get(labels::REPLICA_INDEX)
                    .and_then(|i| i.parse().ok())
                    .unwrap_or(0);
                (index, c.name)
            })
            .collect();
        replicas.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(replicas)
    }

    // ---- ensure-network / ensure-volume ----

    async fn ensure_networks(&self, service: &Service, cancel: &CancelToken) -> Result<()> {
        let keys: Vec<String> = if service.networks.is_empty() {
            vec![convoy_core::DEFAULT_NETWORK.to_string()]
        } else {
            service.networks.iter().map(|n| n.name.clone()).collect()
        };

        for key in keys {
            let Some(spec) = self.project.networks.get(&key) else {
                continue;
            };
            let name = self.project.network_name(&key);

            match self.gateway.inspect_network(&name).await? {
                Some(existing) => {
                    if spec.external {
                        continue;
                    }
                    // 既存リソースは所有ラベルが一致しなければならない
                    let owner = existing
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(labels::PROJECT))
                        .cloned();
                    if owner.as_deref() != Some(self.project.name.as_str()) {
                        return Err(OrchestratorError::ResourceConflict {
                            resource: name,
                            reason: format!(
                                "所有プロジェクトが {:?} です",
                                owner.unwrap_or_else(|| "(なし)".to_string())
                            ),
                        });
                    }
                }
                None if spec.external => {
                    return Err(OrchestratorError::ResourceConflict {
                        resource: name,
                        reason: "external指定ですが存在しません".to_string(),
                    });
                }
                None => {
                    cancel.check()?;
                    let mut net_labels = labels::resource_labels(&self.project.name);
                    net_labels.extend(spec.labels.clone());
                    match self
                        .gateway
                        .create_network(&name, spec, net_labels)
                        .await
                    {
                        Ok(()) => info!(network = %name, "Network created"),
                        // 並行ユニットが先に作った場合は成功扱い
                        Err(GatewayError::AlreadyExists(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Ok(())
    }

    async fn ensure_volumes(&self, service: &Service, cancel: &CancelToken) -> Result<()> {
        for mount in &service.volumes {
            let Some(key) = mount.volume_name() else {
                continue;
            };
            let Some(spec) = self.project.volumes.get(key) else {
                continue;
            };
            let name = self.project.volume_name(key);

            match self.gateway.inspect_volume(&name).await? {
                Some(existing) => {
                    if spec.external {
                        continue;
                    }
                    let owner = existing
                        .labels
                        .get(labels::PROJECT)
                        .cloned();
                    if owner.as_deref() != Some(self.project.name.as_str()) {
                        return Err(OrchestratorError::ResourceConflict {
                            resource: name,
                            reason: format!(
                                "所有プロジェクトが {:?} です",
                                owner.unwrap_or_else(|| "(なし)".to_string())
                            ),
                        });
                    }
                }
                None if spec.external => {
                    return Err(OrchestratorError::ResourceConflict {
                        resource: name,
                        reason: "external指定ですが存在しません".to_string(),
                    });
                }
                None => {
                    cancel.check()?;
                    let mut vol_labels = labels::resource_labels(&self.project.name);
                    vol_labels.extend(spec.labels.clone());
                    self.gateway.create_volume(&name, spec, vol_labels).await?;
                    info!(volume = %name, "Volume created");
                }
            }
        }
        Ok(())
    }

    // ---- build-or-pull ----

    /// イメージを用意して参照を返す。同一フィンガープリントは
    /// アーティファクトキャッシュで重複排除される。
    async fn build_or_pull(
        &self,
        name: &str,
        service: &Service,
        cancel: &CancelToken,
    ) -> Result<String> {
        let image = service.image_ref(&self.project.name, name);

        if let Some(build) = &service.build
            && !self.options.no_build
        {
            // イメージが既にあり --build も無ければビルドしない
            if !self.options.force_build && self.gateway.image_exists(&image).await? {
                return Ok(image);
            }

            let context_path = self.project.working_dir.join(&build.context);
            let dockerfile_path = build
                .dockerfile
                .as_ref()
                .map(|d| context_path.join(d));
            let context_data = ContextBuilder::create_context(
                &context_path,
                dockerfile_path.as_deref(),
            )?;
            let dockerfile_name = build
                .dockerfile
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "Dockerfile".to_string());

            let fingerprint = build_fingerprint(
                &context_data,
                &dockerfile_name,
                &build.args,
                build.target.as_deref(),
            );

            cancel.check()?;
            let gateway = self.gateway.clone();
            let tag = image.clone();
            let args = build.args.clone();
            let target = build.target.clone();
            let cache_from = build.cache_from.clone();
            return self
                .cache
                .get_or_run(&fingerprint, || async move {
                    let builder = ImageBuilder::new(gateway.docker().clone());
                    builder
                        .build_image(
                            context_data,
                            &tag,
                            &dockerfile_name,
                            args,
                            target.as_deref(),
                            &cache_from,
                            false,
                        )
                        .await?;
                    Ok(tag)
                })
                .await;
        }

        // pull側。フィンガープリントはイメージ参照
        cancel.check()?;
        let gateway = self.gateway.clone();
        let reference = image.clone();
        let policy = service.pull_policy;
        let quiet = self.options.quiet_pull;
        self.cache
            .get_or_run(&format!("pull:{}", image), || async move {
                gateway.ensure_image(&reference, policy, quiet).await?;
                Ok(reference)
            })
            .await
    }

    // ---- create / start / stop / remove ----

    /// レプリカ一つを作成（既存は config-hash 一致なら再利用）
    async fn create_replica(
        &self,
        name: &str,
        service: &Service,
        index: u32,
        hash: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let container_name = self.project.container_name(name, index);

        match self.gateway.inspect_container(&container_name).await {
            Ok(existing) => {
                let existing_hash = existing
                    .config
                    .as_ref()
                    .and_then(|c| c.labels.as_ref())
                    .and_then(|l| l.get(labels::CONFIG_HASH))
                    .cloned();
                if existing_hash.as_deref() == Some(hash) && !self.options.force_recreate {
                    debug!(container = %container_name, "Config hash unchanged, reusing");
                    return Ok(());
                }
                // 古いレプリカを止めてから置き換える。同じindexで
                // 二つのコンテナが同時に存在する瞬間を作らない
                info!(container = %container_name, "Config changed, replacing");
                cancel.check()?;
                self.gateway
                    .stop_container(&container_name, self.stop_timeout(service))
                    .await?;
                cancel.check()?;
                self.gateway
                    .remove_container(&container_name, false, true)
                    .await?;
            }
            Err(GatewayError::ContainerNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        cancel.check()?;
        let config = convoy_container::service_to_container_config(
            &self.project,
            name,
            service,
            index,
            hash,
            false,
        );
        self.gateway.create_container(&container_name, config).await?;
        info!(container = %container_name, "Container created");
        Ok(())
    }

    /// レプリカ一つを起動してrunningを待つ
    async fn start_replica(
        &self,
        name: &str,
        index: u32,
        cancel: &CancelToken,
    ) -> Result<()> {
        let container_name = self.project.container_name(name, index);

        // ログ接続は起動前に行う（最初の1バイトを取りこぼさない）
        if let Some(mux) = &self.logmux
            && !self.options.detach
        {
            mux.attach(
                self.gateway.clone(),
                container_name.clone(),
                name,
                index,
                cancel.clone(),
            );
        }

        // 既にrunningなら起動RPCを発行しない（upの冪等性）
        if self.gateway.task_status(&container_name).await? == convoy_container::TaskStatus::Running
        {
            return Ok(());
        }

        cancel.check()?;
        self.gateway.start_container(&container_name).await?;
        waiter::wait_for_condition(
            &self.gateway,
            &container_name,
            DependCondition::ServiceStarted,
            self.options.edge_timeout_secs,
            cancel,
        )
        .await?;
        Ok(())
    }

    /// up ユニット: ensure → build/pull → create → start
    async fn unit_up(&self, name: &str, cancel: &CancelToken, start: bool) -> Result<()> {
        let service = self.service(name)?;
        let desired = self.scale_of(name, service);

        self.ensure_networks(service, cancel).await?;
        self.ensure_volumes(service, cancel).await?;

        // 余剰レプリカ（scale縮小・scale=0）はindex降順で除去
        for (index, container_name) in self.existing_replicas(name).await? {
            if index > desired || desired == 0 {
                cancel.check()?;
                info!(container = %container_name, "Removing excess replica");
                self.gateway
                    .stop_container(&container_name, self.stop_timeout(service))
                    .await?;
                self.gateway
                    .remove_container(&container_name, false, true)
                    .await?;
            }
        }
        if desired == 0 {
            return Ok(());
        }

        self.build_or_pull(name, service, cancel).await?;

        let hash = config_hash(&self.project, name, service);

        // 作成はindex昇順
        for index in 1..=desired {
            cancel.check()?;
            self.create_replica(name, service, index, &hash, cancel).await?;
        }

        if start {
            for index in 1..=desired {
                cancel.check()?;
                self.start_replica(name, index, cancel).await?;
            }
        }
        Ok(())
    }

    /// stop / down ユニット: index降順で停止、必要なら削除
    async fn unit_stop(&self, name: &str, cancel: &CancelToken, remove: bool) -> Result<()> {
        let service = self.service(name)?;
        let timeout = self.stop_timeout(service);

        for (_, container_name) in self.existing_replicas(name).await? {
            cancel.check()?;
            match self.gateway.stop_container(&container_name, timeout).await {
                Ok(()) => debug!(container = %container_name, "Container stopped"),
                Err(GatewayError::ContainerNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
            if remove {
                cancel.check()?;
                // 匿名ボリュームはコンテナと共に削除
                self.gateway
                    .remove_container(&container_name, false, true)
                    .await?;
                debug!(container = %container_name, "Container removed");
            }
        }
        Ok(())
    }

    async fn unit_start(&self, name: &str, cancel: &CancelToken) -> Result<()> {
        let service = self.service(name)?;
        let desired = self.scale_of(name, service);
        for index in 1..=desired {
            cancel.check()?;
            self.start_replica(name, index, cancel).await?;
        }
        Ok(())
    }

    async fn unit_simple<F, Fut>(&self, name: &str, cancel: &CancelToken, op: F) -> Result<()>
    where
        F: Fn(Gateway, String) -> Fut,
        Fut: Future<Output = convoy_container::Result<()>>,
    {
        for (_, container_name) in self.existing_replicas(name).await? {
            cancel.check()?;
            match op(self.gateway.clone(), container_name).await {
                Ok(()) => {}
                Err(GatewayError::ContainerNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for WorkDispatcher {
    async fn run_unit(&self, name: &str, action: Action, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let result = match action {
            Action::Up => self.unit_up(name, cancel, true).await,
            Action::Create => self.unit_up(name, cancel, false).await,
            Action::Start => self.unit_start(name, cancel).await,
            Action::Stop => self.unit_stop(name, cancel, false).await,
            Action::Down => self.unit_stop(name, cancel, true).await,
            Action::Remove => self.unit_stop(name, cancel, true).await,
            Action::Restart => {
                self.unit_simple(name, cancel, |gateway, container| async move {
                    gateway.restart_container(&container).await
                })
                .await
            }
            Action::Kill => {
                let signal = self.options.kill_signal.clone();
                self.unit_simple(name, cancel, move |gateway, container| {
                    let signal = signal.clone();
                    async move { gateway.kill_container(&container, &signal).await }
                })
                .await
            }
            Action::Pause => {
                self.unit_simple(name, cancel, |gateway, container| async move {
                    gateway.pause_container(&container).await
                })
                .await
            }
            Action::Unpause => {
                self.unit_simple(name, cancel, |gateway, container| async move {
                    gateway.unpause_container(&container).await
                })
                .await
            }
            Action::Build => {
                let service = self.service(name)?;
                if service.build.is_some() {
                    self.build_or_pull(name, service, cancel).await.map(|_| ())
                } else {
                    Ok(())
                }
            }
            Action::Pull => {
                let service = self.service(name)?;
                if let Some(image) = &service.image {
                    let gateway = self.gateway.clone();
                    let reference = image.clone();
                    let quiet = self.options.quiet_pull;
                    self.cache
                        .get_or_run(&format!("pull:{}", image), || async move {
                            gateway
                                .pull_image(&reference, quiet)
                                .await
                                .map(|_| reference)
                                .map_err(Into::into)
                        })
                        .await
                        .map(|_| ())
                } else {
                    Ok(())
                }
            }
            Action::Push => {
                let service = self.service(name)?;
                let image = service.image_ref(&self.project.name, name);
                self.gateway.push_image(&image).await.map_err(Into::into)
            }
        };

        // 失敗にサービス名を添えて伝播
        result.map_err(|err| {
            if err.is_cancelled() {
                err
            } else {
                err_with_service(name, err)
            }
        })
    }

    /// 依存エッジの条件待機。全レプリカで成立するまで待つ
    async fn wait_edge(
        &self,
        dependency: &str,
        condition: DependCondition,
        cancel: &CancelToken,
    ) -> Result<()> {
        let service = self.service(dependency)?;
        let desired = self.scale_of(dependency, service);

        for index in 1..=desired {
            let container_name = self.project.container_name(dependency, index);
            waiter::wait_for_condition(
                &self.gateway,
                &container_name,
                condition,
                self.options.edge_timeout_secs,
                cancel,
            )
            .await
            .map_err(|err| match err {
                GatewayError::Timeout { secs, .. } => OrchestratorError::Timeout {
                    service: dependency.to_string(),
                    secs,
                },
                GatewayError::Cancelled => OrchestratorError::Cancelled,
                other => OrchestratorError::UnitFailed {
                    service: dependency.to_string(),
                    reason: other.to_string(),
                },
            })?;
        }
        Ok(())
    }
}

fn err_with_service(service: &str, err: OrchestratorError) -> OrchestratorError {
    match err {
        OrchestratorError::UnitFailed { .. }
        | OrchestratorError::Timeout { .. }
        | OrchestratorError::ResourceConflict { .. }
        | OrchestratorError::Aggregate { .. } => err,
        other => OrchestratorError::UnitFailed {
            service: service.to_string(),
            reason: other.to_string(),
        },
    }
}

// ---- プロジェクトレベルの後始末（downの最後に呼ぶ） ----

/// プロジェクト所有のネットワークを削除（external除外）
pub async fn remove_project_networks(gateway: &Gateway, project: &Project) -> Result<()> {
    let mut keys: Vec<&String> = project.networks.keys().collect();
    keys.sort();
    for key in keys {
        let spec = &project.networks[key];
        if spec.external {
            continue;
        }
        let name = project.network_name(key);
        match gateway.remove_network(&name).await {
            Ok(()) => info!(network = %name, "Network removed"),
            Err(e) => warn!(network = %name, error = %e, "Network removal failed"),
        }
    }
    Ok(())
}

/// プロジェクト所有のボリュームを削除（down -v、external除外）
pub async fn remove_project_volumes(gateway: &Gateway, project: &Project) -> Result<()> {
    let mut keys: Vec<&String> = project.volumes.keys().collect();
    keys.sort();
    for key in keys {
        let spec = &project.volumes[key];
        if spec.external {
            continue;
        }
        let name = project.volume_name(key);
        match gateway.remove_volume(&name).await {
            Ok(()) => info!(volume = %name, "Volume removed"),
            Err(e) => warn!(volume = %name, error = %e, "Volume removal failed"),
        }
    }
    Ok(())
}
