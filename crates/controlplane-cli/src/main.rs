//! Thin demonstration CLI. Wires one
//! [`controlplane_core::Orchestrator::execute_operation`] call end to end
//! against file-backed/mock collaborators: a `clap::Parser` struct with
//! global flags plus a `Subcommand` enum, one `run_*` function per
//! subcommand, plain `println!` rendering of the result structs (no
//! TUI/progress bar, since this binary demonstrates wiring rather than
//! drives a real long-running deployment).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use controlplane_types::ExecutionResult;

mod harness;

use harness::Demo;

#[derive(Parser, Debug)]
#[command(name = "controlplane", version)]
#[command(about = "Self-healing control-plane core: demonstration CLI")]
struct Cli {
    /// Path to controlplane.toml (defaults to the built-in defaults if absent)
    #[arg(long, default_value = "controlplane.toml")]
    config: PathBuf,

    /// Directory for the tamper-evident audit log
    #[arg(long, default_value = ".controlplane/audit")]
    audit_dir: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration (defaults merged with controlplane.toml).
    Config,
    /// Run one deploy -> verify -> (rollback if needed) operation end to end
    /// through the concurrency orchestrator, against in-memory fakes.
    Run {
        /// Service name (its criticality is looked up from the config's service registry).
        #[arg(long, default_value = "checkout")]
        service: String,
        /// Image tag to deploy.
        #[arg(long, default_value = "v2")]
        image: String,
        /// Simulate a treatment group that regresses, forcing a rollback decision.
        #[arg(long)]
        inject_regression: bool,
    },
    /// Print the audit log's event count and chain head, verifying the hash chain.
    AuditStatus,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        controlplane_config::load_config(&cli.config)?
    } else {
        controlplane_config::Config::default()
    };

    std::fs::create_dir_all(&cli.audit_dir)?;

    match cli.cmd {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Run { service, image, inject_regression } => {
            let demo = Demo::new(&cli.audit_dir, &config, inject_regression)?;
            let result = demo.run(&service, &image)?;
            print_execution_result(&result);
        }
        Commands::AuditStatus => {
            let audit = controlplane_audit::AuditLog::new(&cli.audit_dir)?;
            let stats = audit.statistics();
            let (valid, broken_at) = audit.verify_chain()?;
            println!("events: {}", stats.total_events);
            println!("last_hash: {}", stats.last_hash.as_deref().unwrap_or("GENESIS"));
            println!("chain_valid: {valid}");
            if let Some(event_id) = broken_at {
                println!("chain_broken_at: {event_id}");
            }
        }
    }

    Ok(())
}

fn print_execution_result(result: &ExecutionResult) {
    println!("operation_id:  {}", result.operation_id);
    println!("service:       {}", result.service);
    println!("result:        {:?}", result.result);
    println!("duration_s:    {:.3}", result.duration_seconds);
    println!("lock_acquired: {}", result.lock_acquired);
    println!("safety_passed: {}", result.safety_gates_passed);
    if let Some(reason) = &result.pause_reason {
        println!("pause_reason:  {reason}");
    }
    if let Some(error) = &result.error {
        println!("error:         {error}");
    }
    println!();
    println!("state transitions:");
    for transition in &result.state_transitions {
        println!("  - {transition}");
    }
    println!("audit events:");
    for event in &result.audit_events {
        println!("  - {event}");
    }
}

#[cfg(test)]
mod tests {
    use assert_cmd::Command;

    #[test]
    fn config_subcommand_prints_defaults() {
        let dir = tempfile::tempdir().unwrap();
        Command::cargo_bin("controlplane")
            .unwrap()
            .args(["--audit-dir", dir.path().join("audit").to_str().unwrap(), "config"])
            .assert()
            .success()
            .stdout(predicates::str::contains("\"canary\""));
    }

    #[test]
    fn run_subcommand_executes_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        Command::cargo_bin("controlplane")
            .unwrap()
            .args([
                "--audit-dir",
                dir.path().join("audit").to_str().unwrap(),
                "run",
                "--service",
                "checkout",
                "--image",
                "v2",
            ])
            .assert()
            .success()
            .stdout(
                predicates::str::contains("operation_id:")
                    .and(predicates::str::contains("result:        Success"))
                    .and(predicates::str::contains("error:").not()),
            );
    }

    #[test]
    fn run_subcommand_with_injected_regression_reports_rollback_path() {
        let dir = tempfile::tempdir().unwrap();
        Command::cargo_bin("controlplane")
            .unwrap()
            .args([
                "--audit-dir",
                dir.path().join("audit").to_str().unwrap(),
                "run",
                "--service",
                "checkout",
                "--image",
                "v2",
                "--inject-regression",
            ])
            .assert()
            .success();
    }

    #[test]
    fn audit_status_reports_a_valid_empty_chain() {
        let dir = tempfile::tempdir().unwrap();
        Command::cargo_bin("controlplane")
            .unwrap()
            .args(["--audit-dir", dir.path().join("audit").to_str().unwrap(), "audit-status"])
            .assert()
            .success()
            .stdout(predicates::str::contains("chain_valid: true"));
    }
}
