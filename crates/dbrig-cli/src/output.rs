use dbrig_common::container::{Container, ContainerStatus};
use dbrig_engine::QueryResult;

fn status_str(status: ContainerStatus) -> &'static str {
    match status {
        ContainerStatus::Created => "CREATED",
        ContainerStatus::Running => "RUNNING",
        ContainerStatus::Stopped => "STOPPED",
    }
}

pub fn print_container_list(containers: &[Container]) {
    println!("\n=== dbrig Containers ===");
    if containers.is_empty() {
        println!("  (no containers)");
        return;
    }
    println!("  {:<20} {:<12} {:<10} {:<8} {:<20}", "NAME", "ENGINE", "STATUS", "PORT", "DATABASE");
    for container in containers {
        println!(
            "  {:<20} {:<12} {:<10} {:<8} {:<20}",
            container.name,
            container.engine,
            status_str(container.status),
            container.port,
            container.database
        );
    }
    println!();
}

pub fn print_container_status(container: &Container, running: bool, message: &str) {
    println!("\n=== {} ({}) ===", container.name, container.engine);
    println!("  status:   {}", if running { "RUNNING" } else { "STOPPED" });
    println!("  port:     {}", container.port);
    println!("  version:  {}", container.version);
    println!("  database: {}", container.database);
    println!("  message:  {message}");
    println!();
}

pub fn print_databases(names: &[String]) {
    println!("\n=== Databases ===");
    if names.is_empty() {
        println!("  (none)");
    } else {
        for name in names {
            println!("  {name}");
        }
    }
    println!();
}

pub fn print_query_result(result: &QueryResult) {
    if result.columns.is_empty() {
        println!("(no columns)");
        return;
    }
    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            result
                .rows
                .iter()
                .map(|row| row.get(i).map(|v| v.len()).unwrap_or(0))
                .chain(std::iter::once(col.len()))
                .max()
                .unwrap_or(col.len())
        })
        .collect();

    let header: Vec<String> = result
        .columns
        .iter()
        .zip(&widths)
        .map(|(col, width)| format!("{col:<width$}"))
        .collect();
    println!("{}", header.join(" | "));
    println!("{}", "-".repeat(header.iter().map(|h| h.len() + 3).sum()));
    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{value:<width$}"))
            .collect();
        println!("{}", cells.join(" | "));
    }
    println!("\n({} row{})", result.rows.len(), if result.rows.len() == 1 { "" } else { "s" });
}
