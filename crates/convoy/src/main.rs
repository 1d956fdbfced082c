mod commands;
mod docker;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use convoy_core::LoadOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(about = "宣言的なマニフェストでコンテナ群をまとめて動かす", long_about = None)]
#[command(version)]
struct Cli {
    /// マニフェストファイル（複数指定可、後のファイルが優先）
    #[arg(long = "file", global = true)]
    files: Vec<PathBuf>,

    /// プロジェクト名（省略時は COMPOSE_PROJECT_NAME かディレクトリ名）
    #[arg(short = 'p', long = "project-name", global = true)]
    project_name: Option<String>,

    /// プロジェクトディレクトリ（省略時はカレント）
    #[arg(long = "project-directory", global = true)]
    project_directory: Option<PathBuf>,

    /// 有効化するプロファイル
    #[arg(long = "profile", global = true)]
    profiles: Vec<String>,

    /// 色なし出力
    #[arg(long = "no-color", global = true)]
    no_color: bool,

    /// 最初の失敗で実行中のユニットも巻き戻す
    #[arg(long = "fail-fast", global = true)]
    fail_fast: bool,

    /// ユニットの同時実行数（デフォルト: サービス数、上限16）
    #[arg(long = "parallel", global = true)]
    parallel: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// サービス群を作成して起動
    Up {
        /// バックグラウンドで起動（ログを繋がない）
        #[arg(short = 'd', long)]
        detach: bool,
        /// 起動前に必ずビルドする
        #[arg(long = "build", conflicts_with = "no_build")]
        build: bool,
        /// build設定があってもビルドしない
        #[arg(long = "no-build")]
        no_build: bool,
        /// config-hashが一致しても作り直す
        #[arg(long = "force-recreate")]
        force_recreate: bool,
        /// スケール上書き（SERVICE=N、複数指定可）
        #[arg(long = "scale")]
        scale: Vec<String>,
        /// 停止猶予時間の上書き（秒）
        #[arg(short = 't', long = "timeout")]
        timeout: Option<u64>,
        /// アクション全体のデッドライン（秒）
        #[arg(long = "deadline")]
        deadline: Option<u64>,
        /// 対象サービス（省略時は全サービス）
        services: Vec<String>,
    },
    /// サービス群を停止して削除
    Down {
        /// プロジェクト所有のボリュームも削除
        #[arg(short = 'v', long = "volumes")]
        volumes: bool,
        /// マニフェストに無いプロジェクトのコンテナも削除
        #[arg(long = "remove-orphans")]
        remove_orphans: bool,
        /// 停止猶予時間の上書き（秒）
        #[arg(short = 't', long = "timeout")]
        timeout: Option<u64>,
    },
    /// 作成済みのサービスを起動
    Start {
        services: Vec<String>,
    },
    /// サービスを停止（削除はしない）
    Stop {
        /// 停止猶予時間の上書き（秒）
        #[arg(short = 't', long = "timeout")]
        timeout: Option<u64>,
        services: Vec<String>,
    },
    /// サービスを再起動
    Restart {
        services: Vec<String>,
    },
    /// サービスにシグナルを送る
    Kill {
        /// 送るシグナル
        #[arg(short = 's', long = "signal", default_value = "SIGKILL")]
        signal: String,
        services: Vec<String>,
    },
    /// サービスを一時停止
    Pause {
        services: Vec<String>,
    },
    /// 一時停止を解除
    Unpause {
        services: Vec<String>,
    },
    /// コンテナを作成する（起動はしない）
    Create {
        services: Vec<String>,
    },
    /// 停止済みコンテナを削除
    Rm {
        services: Vec<String>,
    },
    /// コンテナの一覧を表示
    Ps {
        /// 停止中・使い捨てコンテナも表示
        #[arg(short, long)]
        all: bool,
    },
    /// コンテナのログを表示
    Logs {
        /// ログをリアルタイムで追跡
        #[arg(short, long)]
        follow: bool,
        /// 末尾からの行数
        #[arg(long, default_value = "100")]
        tail: usize,
        /// タイムスタンプを表示
        #[arg(short = 't', long)]
        timestamps: bool,
        /// 対象サービス（省略時は全サービス）
        services: Vec<String>,
    },
    /// コンテナ内のプロセス一覧
    Top {
        services: Vec<String>,
    },
    /// 公開ポートのホスト側バインドを表示
    Port {
        service: String,
        container_port: u16,
        /// レプリカindex
        #[arg(long, default_value = "1")]
        index: u32,
    },
    /// 実行中のコンテナでコマンドを実行
    Exec {
        /// バックグラウンドで実行
        #[arg(short = 'd', long)]
        detach: bool,
        /// 標準入力を繋ぐ
        #[arg(short = 'i', long)]
        interactive: bool,
        /// 擬似TTYを割り当てる
        #[arg(short = 't', long)]
        tty: bool,
        /// 実行ユーザー
        #[arg(short = 'u', long)]
        user: Option<String>,
        /// 環境変数（KEY=VALUE、複数指定可）
        #[arg(short = 'e', long = "env")]
        env: Vec<String>,
        /// レプリカindex
        #[arg(long, default_value = "1")]
        index: u32,
        service: String,
        /// 実行するコマンド
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// 使い捨てコンテナでコマンドを実行
    Run {
        /// 終了後にコンテナを削除
        #[arg(long)]
        rm: bool,
        /// 依存サービスを起動しない
        #[arg(long = "no-deps")]
        no_deps: bool,
        service: String,
        /// 実行するコマンド（省略時はサービス定義のcommand）
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// イメージをビルド
    Build {
        services: Vec<String>,
    },
    /// イメージをpull
    Pull {
        /// 進捗を表示しない
        #[arg(short, long)]
        quiet: bool,
        services: Vec<String>,
    },
    /// イメージをpush
    Push {
        services: Vec<String>,
    },
    /// マージ・補間済みのマニフェストを表示
    Config,
    /// サービスごとの解決済みイメージを表示
    Images,
    /// コンテナと間でファイルをコピー（SERVICE:PATH 形式）
    Cp {
        src: String,
        dst: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 通常のCLIコマンドはstderrにログ出力
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // プロジェクトのロード。マニフェスト起因の失敗は exit 125
    let load_options = LoadOptions {
        files: cli.files.clone(),
        project_name: cli.project_name.clone(),
        project_dir: cli.project_directory.clone(),
        profiles: cli.profiles.clone(),
    };
    let project = match convoy_core::load_project(&load_options) {
        Ok(project) => std::sync::Arc::new(project),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(125);
        }
    };
    tracing::debug!(project = %project.name, services = project.services.len(), "Project loaded");

    let scheduler_defaults = convoy_compose::SchedulerOptions {
        parallelism: cli.parallel,
        fail_fast: cli.fail_fast,
        deadline_secs: None,
    };

    let result = match cli.command {
        Commands::Up {
            detach,
            build,
            no_build,
            force_recreate,
            scale,
            timeout,
            deadline,
            services,
        } => {
            commands::up::handle(
                project.clone(),
                commands::up::UpArgs {
                    detach,
                    force_build: build,
                    no_build,
                    force_recreate,
                    scale,
                    timeout,
                    deadline,
                    services,
                    no_color: cli.no_color,
                },
                scheduler_defaults,
            )
            .await
        }
        Commands::Down {
            volumes,
            remove_orphans,
            timeout,
        } => {
            commands::down::handle(
                project.clone(),
                volumes,
                remove_orphans,
                timeout,
                scheduler_defaults,
            )
            .await
        }
        Commands::Start { services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Start,
                services,
                Default::default(),
                scheduler_defaults,
            )
            .await
        }
        Commands::Stop { timeout, services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Stop,
                services,
                convoy_compose::DispatchOptions {
                    timeout_override: timeout,
                    ..Default::default()
                },
                scheduler_defaults,
            )
            .await
        }
        Commands::Restart { services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Restart,
                services,
                Default::default(),
                scheduler_defaults,
            )
            .await
        }
        Commands::Kill { signal, services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Kill,
                services,
                convoy_compose::DispatchOptions {
                    kill_signal: signal,
                    ..Default::default()
                },
                scheduler_defaults,
            )
            .await
        }
        Commands::Pause { services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Pause,
                services,
                Default::default(),
                scheduler_defaults,
            )
            .await
        }
        Commands::Unpause { services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Unpause,
                services,
                Default::default(),
                scheduler_defaults,
            )
            .await
        }
        Commands::Create { services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Create,
                services,
                Default::default(),
                scheduler_defaults,
            )
            .await
        }
        Commands::Rm { services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Remove,
                services,
                Default::default(),
                scheduler_defaults,
            )
            .await
        }
        Commands::Ps { all } => commands::ps::handle(&project, all).await,
        Commands::Logs {
            follow,
            tail,
            timestamps,
            services,
        } => {
            commands::logs::handle(
                project.clone(),
                services,
                follow,
                tail,
                timestamps,
                cli.no_color,
            )
            .await
        }
        Commands::Top { services } => commands::top::handle(&project, services).await,
        Commands::Port {
            service,
            container_port,
            index,
        } => commands::port::handle(&project, &service, container_port, index).await,
        Commands::Exec {
            detach,
            interactive,
            tty,
            user,
            env,
            index,
            service,
            command,
        } => {
            commands::exec::handle(
                &project, &service, index, command, user, env, interactive, tty, detach,
            )
            .await
        }
        Commands::Run {
            rm,
            no_deps,
            service,
            command,
        } => {
            commands::run::handle(project.clone(), service, command, rm, no_deps, scheduler_defaults)
                .await
        }
        Commands::Build { services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Build,
                services,
                convoy_compose::DispatchOptions {
                    force_build: true,
                    ..Default::default()
                },
                scheduler_defaults,
            )
            .await
        }
        Commands::Pull { quiet, services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Pull,
                services,
                convoy_compose::DispatchOptions {
                    quiet_pull: quiet,
                    ..Default::default()
                },
                scheduler_defaults,
            )
            .await
        }
        Commands::Push { services } => {
            commands::lifecycle::handle(
                project.clone(),
                convoy_compose::Action::Push,
                services,
                Default::default(),
                scheduler_defaults,
            )
            .await
        }
        Commands::Config => commands::config::handle(&project),
        Commands::Images => commands::images::handle(&project).await,
        Commands::Cp { src, dst } => commands::cp::handle(&project, &src, &dst).await,
    };

    if let Err(e) = result {
        // 集約エラーの内訳は各コマンドが出力済み
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
