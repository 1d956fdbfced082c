use crate::docker;
use colored::Colorize;
use convoy_compose::Result;
use convoy_core::Project;

#[allow(clippy::too_many_arguments)]
pub async fn handle(
    project: &Project,
    service: &str,
    index: u32,
    command: Vec<String>,
    user: Option<String>,
    env: Vec<String>,
    interactive: bool,
    tty: bool,
    detach: bool,
) -> Result<()> {
    if !project.services.contains_key(service) {
        return Err(convoy_core::ComposeError::ServiceNotFound(service.to_string()).into());
    }

    // コマンドが省略された場合は /bin/sh
    let cmd = if command.is_empty() {
        vec!["/bin/sh".to_string()]
    } else {
        command
    };

    let container_name = project.container_name(service, index);
    println!(
        "{}",
        format!("コンテナ '{}' でコマンドを実行中...", container_name).green()
    );
    println!("コマンド: {}", cmd.join(" ").cyan());
    println!();

    let gateway = docker::connect_gateway().await?;

    // 参照解決（running のみ対象）。止まっている場合はここで分かる
    let resolved = convoy_container::walk(
        &gateway,
        &container_name,
        Some(&|c: &convoy_container::ContainerRef| c.is_running()),
    )
    .await?;
    let Some(target) = resolved.first() else {
        return Err(convoy_compose::OrchestratorError::UnitFailed {
            service: service.to_string(),
            reason: format!("コンテナ '{}' は起動していません", container_name),
        });
    };

    let exit_code = gateway
        .exec_streamed(&target.id, cmd, user, env, interactive, tty, detach)
        .await?;

    if detach {
        println!("{}", "コマンドをデタッチモードで実行しました".green());
        return Ok(());
    }

    if exit_code != 0 {
        std::process::exit(exit_code as i32);
    }
    Ok(())
}
