use colored::Colorize;
use convoy_compose::{NodeReport, NodeState, OrchestratorError};
use convoy_container::CancelSource;
use std::collections::HashMap;
use std::sync::Arc;

/// SIGINT/SIGTERMでキャンセルトークンをトリップする
///
/// 二度目のCtrl+Cは即時終了（130）。
pub fn install_signal_handler(cancel: Arc<CancelSource>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!(
                "{}",
                "中断要求を受け取りました。後片付け中...（もう一度 Ctrl+C で即終了）".yellow()
            );
            cancel.trip();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
}

/// ノード結果を表示し、集約結果を返す
///
/// 失敗したサービスごとに一行のエラーを出す。
pub fn report_results(reports: &[NodeReport]) -> Result<(), OrchestratorError> {
    for report in reports {
        match report.state {
            NodeState::Done => {}
            NodeState::Skipped => {
                println!(
                    "  {} {} {}",
                    "→".dimmed(),
                    report.service.cyan(),
                    "（依存の失敗によりスキップ）".dimmed()
                );
            }
            NodeState::Failed => {
                let reason = report
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                eprintln!("Service \"{}\" failed: {}", report.service, reason);
            }
            _ => {}
        }
    }
    convoy_compose::aggregate(reports)
}

/// `--scale SERVICE=N` をパースする
pub fn parse_scale_overrides(
    specs: &[String],
) -> Result<HashMap<String, u32>, OrchestratorError> {
    let mut overrides = HashMap::new();
    for spec in specs {
        let parsed = spec.split_once('=').and_then(|(service, count)| {
            count
                .parse::<u32>()
                .ok()
                .map(|count| (service.to_string(), count))
        });
        match parsed {
            Some((service, count)) => {
                overrides.insert(service, count);
            }
            None => {
                return Err(OrchestratorError::Compose(
                    convoy_core::ComposeError::ManifestValidation(format!(
                        "--scale の指定が不正です: {}（SERVICE=N の形式）",
                        spec
                    )),
                ));
            }
        }
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scale_overrides() {
        let overrides =
            parse_scale_overrides(&["web=3".to_string(), "db=0".to_string()]).unwrap();
        assert_eq!(overrides["web"], 3);
        assert_eq!(overrides["db"], 0);

        assert!(parse_scale_overrides(&["web".to_string()]).is_err());
        assert!(parse_scale_overrides(&["web=x".to_string()]).is_err());
    }

    #[test]
    fn test_report_results_aggregates_failures() {
        let reports = vec![
            NodeReport {
                service: "db".to_string(),
                state: NodeState::Done,
                error: None,
            },
            NodeReport {
                service: "app".to_string(),
                state: NodeState::Failed,
                error: Some(OrchestratorError::UnitFailed {
                    service: "app".to_string(),
                    reason: "boom".to_string(),
                }),
            },
        ];
        let err = report_results(&reports).unwrap_err();
        assert_eq!(err.exit_code(), 126);
    }
}
