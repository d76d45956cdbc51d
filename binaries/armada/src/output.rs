//! Plain-text rendering of status tables, dependency trees and play
//! summaries.

use armada_core::environment::Environment;
use armada_core::graph::DependencyGraph;
use armada_orchestrator::{PlayReport, StatusRow, TaskOutcome};

/// Prints the status table.
pub fn print_status(rows: &[StatusRow], detailed: bool) {
    println!(
        "{:>3}  {:<20} {:<20} {:<12} {:<28} {}",
        "#", "INSTANCE", "SERVICE", "SHIP", "IMAGE", "STATUS"
    );

    for (idx, row) in rows.iter().enumerate() {
        let status = match row.state.as_str() {
            "running" => match row.uptime_secs {
                Some(uptime) => format!("up for {}", humanize_secs(uptime)),
                None => "up".to_string(),
            },
            "stopped" => {
                let exit = row
                    .exit_code
                    .map(|code| format!("exit {}", code))
                    .unwrap_or_else(|| "exit ?".to_string());
                match row.exited_secs_ago {
                    Some(age) => format!("down ({}, {} ago)", exit, humanize_secs(age)),
                    None => format!("down ({})", exit),
                }
            }
            "host down" => match &row.error {
                Some(error) => format!("host down: {}", error),
                None => "host down".to_string(),
            },
            other => other.to_string(),
        };

        println!(
            "{:>3}. {:<20} {:<20} {:<12} {:<28} {}",
            idx + 1,
            row.container,
            row.service,
            row.ship,
            row.configured_image,
            status
        );

        if detailed {
            for port in &row.ports {
                println!(
                    "     >> {:<16} {:>6}  {}",
                    port.name,
                    port.external_port,
                    if port.open { "up" } else { "down" }
                );
            }
        }
    }
}

/// Prints the service dependency tree of the selected services.
pub fn print_deptree(environment: &Environment, services: &[String], recursive: bool) {
    let graph = environment.graph();
    for (idx, service) in services.iter().enumerate() {
        if idx > 0 {
            println!();
        }
        println!("{}", service);
        print_branch(graph, service, 1, recursive);
    }
}

fn print_branch(graph: &DependencyGraph, service: &str, depth: usize, recursive: bool) {
    for dep in graph.hard_deps(service) {
        println!("{}{}", "  ".repeat(depth), dep);
        if recursive {
            print_branch(graph, dep, depth + 1, recursive);
        }
    }
}

/// Prints per-container failures and the play summary. Returns true when
/// the play failed.
pub fn print_report(report: &PlayReport) -> bool {
    for result in &report.results {
        if let TaskOutcome::Failed { kind, reason } = &result.outcome {
            eprintln!("{}: failed ({}): {}", result.container, kind, reason);
        }
    }
    println!("{}: {}", report.action, report.summary());
    report.failed()
}

fn humanize_secs(secs: i64) -> String {
    if secs >= 86_400 {
        format!("{}d{}h", secs / 86_400, (secs % 86_400) / 3600)
    } else if secs >= 3600 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize_secs() {
        assert_eq!(humanize_secs(42), "42s");
        assert_eq!(humanize_secs(90), "1m30s");
        assert_eq!(humanize_secs(3700), "1h1m");
        assert_eq!(humanize_secs(90_000), "1d1h");
    }
}
