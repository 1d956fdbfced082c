//! start / stop / restart / kill / pause / unpause / create / rm /
//! build / pull / push の共通ハンドラ
//!
//! いずれもスケジューラの一アクションに一対一で対応する。

use crate::{docker, utils};
use colored::Colorize;
use convoy_compose::{
    Action, DispatchOptions, Result, SchedulerOptions, ServiceGraph, WorkDispatcher,
};
use convoy_container::cancel_pair;
use convoy_core::Project;
use std::sync::Arc;

fn action_label(action: Action) -> &'static str {
    match action {
        Action::Start => "起動",
        Action::Stop => "停止",
        Action::Restart => "再起動",
        Action::Kill => "強制停止",
        Action::Pause => "一時停止",
        Action::Unpause => "再開",
        Action::Create => "作成",
        Action::Remove => "削除",
        Action::Build => "ビルド",
        Action::Pull => "プル",
        Action::Push => "プッシュ",
        Action::Up => "起動",
        Action::Down => "停止",
    }
}

pub async fn handle(
    project: Arc<Project>,
    action: Action,
    services: Vec<String>,
    dispatch: DispatchOptions,
    scheduler: SchedulerOptions,
) -> Result<()> {
    let graph = ServiceGraph::build(&project, &services, action.direction())?;
    if graph.is_empty() {
        println!("{}", "対象のサービスがありません".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{}中: {} ({} サービス)",
            action_label(action),
            project.name,
            graph.len()
        )
        .bold()
    );
    for name in graph.names() {
        println!("  • {}", name.cyan());
    }
    println!();

    let gateway = docker::connect_gateway().await?;

    let (source, _token) = cancel_pair();
    let source = Arc::new(source);
    utils::install_signal_handler(source.clone());

    let dispatcher = Arc::new(WorkDispatcher::new(project, gateway, dispatch, None));
    let reports = convoy_compose::run(&graph, action, dispatcher, &scheduler, source).await;
    utils::report_results(&reports)?;

    println!();
    println!(
        "{}",
        format!("✓ {}が完了しました", action_label(action)).green().bold()
    );
    Ok(())
}
