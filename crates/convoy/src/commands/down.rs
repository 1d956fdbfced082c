use crate::{docker, utils};
use colored::Colorize;
use convoy_compose::{
    Action, DispatchOptions, Result, SchedulerOptions, ServiceGraph, WorkDispatcher,
};
use convoy_container::{cancel_pair, labels, walker::ContainerRef};
use convoy_core::Project;
use std::sync::Arc;

pub async fn handle(
    project: Arc<Project>,
    remove_volumes: bool,
    remove_orphans: bool,
    timeout: Option<u64>,
    scheduler: SchedulerOptions,
) -> Result<()> {
    println!("{}", format!("プロジェクト {} を停止中...", project.name).yellow());

    let gateway = docker::connect_gateway().await?;

    let graph = ServiceGraph::build(&project, &[], Action::Down.direction())?;

    let (source, _token) = cancel_pair();
    let source = Arc::new(source);
    utils::install_signal_handler(source.clone());

    let dispatch = DispatchOptions {
        timeout_override: timeout,
        ..Default::default()
    };
    let dispatcher = Arc::new(WorkDispatcher::new(
        project.clone(),
        gateway.clone(),
        dispatch,
        None,
    ));
    let reports =
        convoy_compose::run(&graph, Action::Down, dispatcher, &scheduler, source).await;
    utils::report_results(&reports)?;

    // マニフェストから消えたサービスのコンテナ（orphan）
    if remove_orphans {
        let filter = [labels::project_filter(&project.name)];
        let orphans: Vec<ContainerRef> = gateway
            .list_containers(&filter, true)
            .await?
            .iter()
            .map(ContainerRef::from_summary)
            .filter(|c| {
                c.labels
                    .get(labels::SERVICE)
                    .map(|s| !project.services.contains_key(s))
                    .unwrap_or(true)
            })
            .collect();
        for orphan in orphans {
            println!("  {} orphan を削除: {}", "→".dimmed(), orphan.name.cyan());
            gateway.stop_container(&orphan.name, 10).await?;
            gateway.remove_container(&orphan.name, false, true).await?;
        }
    }

    // ネットワークは常に、ボリュームは -v のときだけ片付ける
    convoy_compose::remove_project_networks(&gateway, &project).await?;
    if remove_volumes {
        convoy_compose::remove_project_volumes(&gateway, &project).await?;
    }

    println!();
    if remove_volumes {
        println!(
            "{}",
            "✓ すべてのサービスとボリュームが削除されました！".green().bold()
        );
    } else {
        println!("{}", "✓ すべてのサービスが停止・削除されました！".green().bold());
    }
    Ok(())
}
