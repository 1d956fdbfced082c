use crate::{docker, utils};
use colored::Colorize;
use convoy_compose::{
    Action, DispatchOptions, LogMultiplexer, MuxOptions, Result, SchedulerOptions, ServiceGraph,
    WorkDispatcher,
};
use convoy_container::{cancel_pair, labels, waiter};
use convoy_core::{Project, config_hash};
use std::sync::Arc;

/// 使い捨てコンテナでコマンドを実行する
///
/// --no-deps が無ければ依存サービスを推移的に起動してから実行する。
pub async fn handle(
    project: Arc<Project>,
    service_name: String,
    command: Vec<String>,
    remove_after: bool,
    no_deps: bool,
    scheduler: SchedulerOptions,
) -> Result<()> {
    let Some(base) = project.services.get(&service_name).cloned() else {
        return Err(convoy_core::ComposeError::ServiceNotFound(service_name).into());
    };

    let gateway = docker::connect_gateway().await?;
    let (source, _token) = cancel_pair();
    let source = Arc::new(source);
    utils::install_signal_handler(source.clone());

    // 依存サービスを先に起動する
    let deps: Vec<String> = base.depends_on.iter().map(|d| d.service.clone()).collect();
    if !no_deps && !deps.is_empty() {
        println!("{}", "依存サービスを起動中...".blue());
        let graph = ServiceGraph::build(&project, &deps, Action::Up.direction())?;
        let dispatcher = Arc::new(WorkDispatcher::new(
            project.clone(),
            gateway.clone(),
            DispatchOptions {
                detach: true,
                ..Default::default()
            },
            None,
        ));
        let reports =
            convoy_compose::run(&graph, Action::Up, dispatcher, &scheduler, source.clone()).await;
        utils::report_results(&reports)?;
        println!();
    }

    // 使い捨てコンテナのサービス定義（コマンド上書き、再起動なし）
    let mut one_off = base.clone();
    if !command.is_empty() {
        one_off.command = Some(command);
    }
    one_off.restart = convoy_core::RestartPolicy::No;

    // 参照するネットワークが無ければ作っておく（ensure-networkと同じ規律）
    let network_keys: Vec<String> = if one_off.networks.is_empty() {
        vec![convoy_core::DEFAULT_NETWORK.to_string()]
    } else {
        one_off.networks.iter().map(|n| n.name.clone()).collect()
    };
    for key in network_keys {
        if let Some(spec) = project.networks.get(&key)
            && !spec.external
        {
            let name = project.network_name(&key);
            match gateway
                .create_network(&name, spec, labels::resource_labels(&project.name))
                .await
            {
                Ok(()) | Err(convoy_container::GatewayError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    gateway
        .ensure_image(
            &one_off.image_ref(&project.name, &service_name),
            one_off.pull_policy,
            false,
        )
        .await?;

    let container_name = format!(
        "{}_{}_run_{}",
        project.name,
        service_name,
        std::process::id()
    );
    let hash = config_hash(&project, &service_name, &one_off);
    let mut config = convoy_container::service_to_container_config(
        &project,
        &service_name,
        &one_off,
        1,
        &hash,
        true,
    );
    // 使い捨てはポートを公開しない（本体レプリカと衝突するため）
    if let Some(host_config) = config.host_config.as_mut() {
        host_config.port_bindings = None;
    }
    config.exposed_ports = None;

    println!(
        "{}",
        format!("▶ {} を実行中...", container_name).green().bold()
    );
    let token = source.token();
    token.check()?;
    // 作成前の名前重複チェック（同名の残骸があれば早期に分かる）
    convoy_container::walker::ensure_name_unique(&gateway, &container_name).await?;
    gateway.create_container(&container_name, config).await?;

    let mux = LogMultiplexer::new(MuxOptions::default());
    mux.attach(
        gateway.clone(),
        container_name.clone(),
        &service_name,
        1,
        token.clone(),
    );

    gateway.start_container(&container_name).await?;

    // すぐ終了するコマンドもあるため running 待ちはせず、終了だけ待つ
    let exit_code = waiter::wait_for_exit(&gateway, &container_name, &token).await?;
    mux.drain().await;

    if remove_after {
        gateway
            .remove_container(&container_name, true, true)
            .await?;
        println!("{}", format!("✓ {} を削除しました", container_name).dimmed());
    }

    if exit_code != 0 {
        std::process::exit(exit_code as i32);
    }
    Ok(())
}
