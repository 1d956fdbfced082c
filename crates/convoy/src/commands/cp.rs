use crate::docker;
use colored::Colorize;
use convoy_compose::{OrchestratorError, Result};
use convoy_core::Project;
use std::path::Path;

/// `SERVICE:PATH` か ローカルパス かを区別した転送元/先
enum Endpoint {
    Container { service: String, path: String },
    Local(String),
}

/// `db:/var/lib/dump.sql` のような形式をパース
///
/// 先頭が `/` や `.` のものはローカルパス（Windowsドライブは非対応）。
fn parse_endpoint(spec: &str) -> Endpoint {
    if spec.starts_with('/') || spec.starts_with('.') {
        return Endpoint::Local(spec.to_string());
    }
    match spec.split_once(':') {
        Some((service, path)) if !path.is_empty() => Endpoint::Container {
            service: service.to_string(),
            path: path.to_string(),
        },
        _ => Endpoint::Local(spec.to_string()),
    }
}

pub async fn handle(project: &Project, src: &str, dst: &str) -> Result<()> {
    let gateway = docker::connect_gateway().await?;

    match (parse_endpoint(src), parse_endpoint(dst)) {
        // コンテナ → ローカル
        (Endpoint::Container { service, path }, Endpoint::Local(local)) => {
            let container_name = resolve_container(project, &service)?;
            println!(
                "{}",
                format!("{}:{} → {}", container_name, path, local).blue()
            );
            let tar_bytes = gateway.download_from_container(&container_name, &path).await?;

            let dst_dir = Path::new(&local);
            std::fs::create_dir_all(dst_dir).map_err(|e| {
                OrchestratorError::UnitFailed {
                    service: service.clone(),
                    reason: format!("コピー先を作成できません: {}", e),
                }
            })?;
            let mut archive = tar::Archive::new(std::io::Cursor::new(tar_bytes));
            archive
                .unpack(dst_dir)
                .map_err(|e| OrchestratorError::UnitFailed {
                    service,
                    reason: format!("アーカイブの展開に失敗しました: {}", e),
                })?;
            println!("{}", "✓ コピー完了".green());
        }
        // ローカル → コンテナ
        (Endpoint::Local(local), Endpoint::Container { service, path }) => {
            let container_name = resolve_container(project, &service)?;
            println!(
                "{}",
                format!("{} → {}:{}", local, container_name, path).blue()
            );

            let src_path = Path::new(&local);
            if !src_path.exists() {
                return Err(OrchestratorError::UnitFailed {
                    service,
                    reason: format!("コピー元が存在しません: {}", local),
                });
            }

            let mut builder = tar::Builder::new(Vec::new());
            let file_name = src_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file");
            if src_path.is_dir() {
                builder
                    .append_dir_all(file_name, src_path)
                    .map_err(|e| OrchestratorError::UnitFailed {
                        service: service.clone(),
                        reason: format!("アーカイブ作成に失敗しました: {}", e),
                    })?;
            } else {
                builder
                    .append_path_with_name(src_path, file_name)
                    .map_err(|e| OrchestratorError::UnitFailed {
                        service: service.clone(),
                        reason: format!("アーカイブ作成に失敗しました: {}", e),
                    })?;
            }
            let tar_bytes = builder
                .into_inner()
                .map_err(|e| OrchestratorError::UnitFailed {
                    service: service.clone(),
                    reason: format!("アーカイブ作成に失敗しました: {}", e),
                })?;

            gateway
                .upload_to_container(&container_name, &path, tar_bytes)
                .await?;
            println!("{}", "✓ コピー完了".green());
        }
        _ => {
            return Err(OrchestratorError::Compose(
                convoy_core::ComposeError::ManifestValidation(
                    "cp は SERVICE:PATH とローカルパスの組で指定してください".to_string(),
                ),
            ));
        }
    }

    Ok(())
}

fn resolve_container(project: &Project, service: &str) -> Result<String> {
    if !project.services.contains_key(service) {
        return Err(convoy_core::ComposeError::ServiceNotFound(service.to_string()).into());
    }
    Ok(project.container_name(service, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_forms() {
        assert!(matches!(
            parse_endpoint("db:/var/lib/dump.sql"),
            Endpoint::Container { .. }
        ));
        assert!(matches!(parse_endpoint("/tmp/out"), Endpoint::Local(_)));
        assert!(matches!(parse_endpoint("./local"), Endpoint::Local(_)));
        assert!(matches!(parse_endpoint("plainfile"), Endpoint::Local(_)));
    }
}
