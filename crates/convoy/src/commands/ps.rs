use crate::docker;
use colored::Colorize;
use convoy_compose::Result;
use convoy_container::labels;
use convoy_core::Project;

pub async fn handle(project: &Project, all: bool) -> Result<()> {
    let gateway = docker::connect_gateway().await?;

    let filter = [labels::project_filter(&project.name)];
    let mut containers = gateway.list_containers(&filter, all).await?;
    // 使い捨てコンテナは --all のときだけ表示
    containers.retain(|c| {
        all || c
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::ONE_OFF))
            .map(String::as_str)
            != Some("true")
    });
    containers.sort_by_key(|c| {
        c.names
            .as_ref()
            .and_then(|n| n.first())
            .cloned()
            .unwrap_or_default()
    });

    println!();
    if containers.is_empty() {
        println!("{}", "実行中のコンテナはありません".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<28} {:<14} {:<12} {:<26} {:<20}",
            "NAME", "SERVICE", "STATUS", "IMAGE", "PORTS"
        )
        .bold()
    );
    println!("{}", "─".repeat(102).dimmed());

    for container in containers {
        let name = container
            .names
            .as_ref()
            .and_then(|n| n.first())
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or("-");
        let service = container
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::SERVICE))
            .map(String::as_str)
            .unwrap_or("-");
        let status = container.status.as_deref().unwrap_or("-");
        let status_colored = if status.contains("Up") {
            status.green()
        } else {
            status.red()
        };
        let image = container.image.as_deref().unwrap_or("-");
        let ports = container
            .ports
            .as_ref()
            .map(|ports| {
                ports
                    .iter()
                    .filter_map(|p| {
                        p.public_port
                            .map(|public| format!("{}:{}", public, p.private_port))
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        println!(
            "{:<28} {:<14} {:<12} {:<26} {:<20}",
            name.cyan(),
            service,
            status_colored,
            image,
            ports.dimmed()
        );
    }

    Ok(())
}
