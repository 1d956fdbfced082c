use crate::docker;
use colored::Colorize;
use convoy_compose::Result;
use convoy_core::Project;

pub async fn handle(project: &Project) -> Result<()> {
    let gateway = docker::connect_gateway().await?;

    println!();
    println!(
        "{}",
        format!("{:<16} {:<44} {:<10}", "SERVICE", "IMAGE", "PRESENT").bold()
    );
    println!("{}", "─".repeat(72).dimmed());

    for name in project.service_names() {
        let service = &project.services[&name];
        let image = service.image_ref(&project.name, &name);
        let present = gateway.image_exists(&image).await?;
        let mark = if present {
            "✓".green().to_string()
        } else {
            "✗".red().to_string()
        };
        println!("{:<16} {:<44} {:<10}", name.cyan(), image, mark);
    }

    Ok(())
}
