use colored::Colorize;
use convoy_compose::OrchestratorError;
use convoy_container::Gateway;

/// デーモン接続を初期化（エラーハンドリング付き）
pub async fn connect_gateway() -> Result<Gateway, OrchestratorError> {
    match Gateway::connect().await {
        Ok(gateway) => Ok(gateway),
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ デーモン接続エラー".red().bold());
            eprintln!();
            eprintln!("{}", "原因:".yellow());
            eprintln!("  {}", e);
            eprintln!();
            eprintln!("{}", "解決方法:".yellow());
            eprintln!("  • Dockerが起動しているか確認してください");
            eprintln!("  • DOCKER_HOST の設定を確認してください");
            eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
            Err(e.into())
        }
    }
}
