use crate::{docker, utils};
use colored::Colorize;
use convoy_compose::{
    Action, DispatchOptions, DisplayState, LogMultiplexer, MuxOptions, Result, SchedulerOptions,
    ServiceGraph, WorkDispatcher,
};
use convoy_container::cancel_pair;
use convoy_core::Project;
use std::sync::Arc;

pub struct UpArgs {
    pub detach: bool,
    pub force_build: bool,
    pub no_build: bool,
    pub force_recreate: bool,
    pub scale: Vec<String>,
    pub timeout: Option<u64>,
    pub deadline: Option<u64>,
    pub services: Vec<String>,
    pub no_color: bool,
}

pub async fn handle(
    project: Arc<Project>,
    args: UpArgs,
    mut scheduler: SchedulerOptions,
) -> Result<()> {
    let graph = ServiceGraph::build(&project, &args.services, Action::Up.direction())?;
    if graph.is_empty() {
        // 空プロジェクトの up は成功の no-op
        println!("{}", "対象のサービスがありません".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!("プロジェクト: {} ({} サービス)", project.name, graph.len()).bold()
    );
    for name in graph.names() {
        println!("  • {}", name.cyan());
    }

    println!();
    println!("{}", "デーモンに接続中...".blue());
    let gateway = docker::connect_gateway().await?;

    let scale_overrides = utils::parse_scale_overrides(&args.scale)?;

    // 前回実行の表示状態を引き継ぐ（無ければ空）
    let mut display_state = DisplayState::load(&project.name);

    let logmux = if args.detach {
        None
    } else {
        Some(LogMultiplexer::new(MuxOptions {
            no_color: args.no_color,
            timestamps: false,
            initial_width: display_state.prefix_width,
        }))
    };

    let dispatch = DispatchOptions {
        detach: args.detach,
        no_build: args.no_build,
        force_build: args.force_build,
        force_recreate: args.force_recreate,
        timeout_override: args.timeout,
        scale_overrides,
        ..Default::default()
    };

    scheduler.deadline_secs = args.deadline;

    let (source, _token) = cancel_pair();
    let source = Arc::new(source);
    utils::install_signal_handler(source.clone());

    let dispatcher = Arc::new(WorkDispatcher::new(
        project.clone(),
        gateway,
        dispatch,
        logmux.clone(),
    ));
    let reports = convoy_compose::run(&graph, Action::Up, dispatcher, &scheduler, source).await;

    // 表示状態を保存（失敗しても致命ではない）
    if let Some(mux) = &logmux {
        display_state.record(mux.width(), graph.names());
        display_state.save(&project.name);
    }

    utils::report_results(&reports)?;

    println!();
    println!("{}", "✓ すべてのサービスが起動しました！".green().bold());

    if let Some(mux) = logmux {
        println!("{}", "Ctrl+C でログ追跡を終了".dimmed());
        println!();
        // 全ストリームが閉じるかキャンセルされるまで追従する
        mux.drain().await;
    }

    Ok(())
}
