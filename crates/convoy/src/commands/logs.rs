use crate::{docker, utils};
use colored::Colorize;
use convoy_compose::{LogMultiplexer, MuxOptions, Result};
use convoy_container::{cancel_pair, labels, walker::ContainerRef};
use convoy_core::Project;
use std::sync::Arc;

pub async fn handle(
    project: Arc<Project>,
    services: Vec<String>,
    follow: bool,
    tail: usize,
    timestamps: bool,
    no_color: bool,
) -> Result<()> {
    let gateway = docker::connect_gateway().await?;

    let target_services = if services.is_empty() {
        project.service_names()
    } else {
        services
    };

    let mux = LogMultiplexer::new(MuxOptions {
        no_color,
        timestamps,
        initial_width: convoy_compose::DisplayState::load(&project.name).prefix_width,
    });

    let (source, _token) = cancel_pair();
    let source = Arc::new(source);
    utils::install_signal_handler(source.clone());

    let mut attached = 0usize;
    for service in &target_services {
        if !project.services.contains_key(service) {
            return Err(convoy_core::ComposeError::ServiceNotFound(service.clone()).into());
        }
        let filters = [
            labels::project_filter(&project.name),
            labels::service_filter(service),
        ];
        let replicas = gateway.list_containers(&filters, true).await?;
        for summary in &replicas {
            let container = ContainerRef::from_summary(summary);
            let index: u32 = container
                .labels
                .get(labels::REPLICA_INDEX)
                .and_then(|i| i.parse().ok())
                .unwrap_or(1);
            mux.attach_with(
                gateway.clone(),
                container.name.clone(),
                service,
                index,
                follow,
                Some(tail),
                source.token(),
            );
            attached += 1;
        }
    }

    if attached == 0 {
        println!("{}", "対象のコンテナがありません".dimmed());
        return Ok(());
    }

    if follow {
        println!("{}", "Ctrl+C でログ追跡を終了".dimmed());
    }
    mux.drain().await;
    Ok(())
}
