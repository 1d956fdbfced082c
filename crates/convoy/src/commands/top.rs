use crate::docker;
use colored::Colorize;
use convoy_compose::Result;
use convoy_container::{ContainerRef, walk_all};
use convoy_core::Project;

pub async fn handle(project: &Project, services: Vec<String>) -> Result<()> {
    let gateway = docker::connect_gateway().await?;

    let target_services = if services.is_empty() {
        project.service_names()
    } else {
        services
    };

    // 各サービスのレプリカ名を解決し、runningのものだけ対象にする
    let mut patterns = Vec::new();
    for service in &target_services {
        let Some(spec) = project.services.get(service) else {
            return Err(convoy_core::ComposeError::ServiceNotFound(service.clone()).into());
        };
        for index in 1..=spec.scale.max(1) {
            patterns.push(project.container_name(service, index));
        }
    }

    let running = walk_all(
        &gateway,
        &patterns,
        false,
        Some(&|c: &ContainerRef| c.is_running()),
    )
    .await?;

    if running.is_empty() {
        println!("{}", "実行中のコンテナがありません".dimmed());
        return Ok(());
    }

    for container in running {
        let top = match gateway.top(&container.name).await {
            Ok(top) => top,
            Err(e) => {
                eprintln!("  ⚠ プロセス取得エラー ({}): {}", container.name, e);
                continue;
            }
        };

        println!("{}", container.name.cyan().bold());
        if let Some(titles) = &top.titles {
            println!("  {}", titles.join("\t").bold());
        }
        for process in top.processes.unwrap_or_default() {
            println!("  {}", process.join("\t"));
        }
        println!();
    }

    Ok(())
}
