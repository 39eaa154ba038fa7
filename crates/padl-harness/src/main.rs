//! padl-conformance - run interface suites against a live pattern
//!
//! Points at a pattern's control plane, discovers its capabilities, and
//! runs the registered suite for each. Exits non-zero when any sub-test
//! fails; untested capabilities do not fail the run.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use padl_harness::{CapabilityOutcome, Connection};

#[derive(Parser)]
#[command(name = "padl-conformance", version, about = "Pattern conformance harness")]
struct Args {
    /// Control-plane endpoint, e.g. http://127.0.0.1:5310
    #[arg(long)]
    endpoint: String,

    /// Emit the report as JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("padl_harness=info".parse()?))
        .init();

    let args = Args::parse();
    let conn = Connection::new(&args.endpoint);
    let report = padl_harness::run(&conn).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &padl_harness::HarnessReport) {
    println!("conformance report for {}", report.endpoint);
    for cap in &report.capabilities {
        match &cap.outcome {
            CapabilityOutcome::Tested { results } => {
                let passed = results.iter().filter(|r| r.passed).count();
                println!("  {} ({}/{} passed)", cap.capability, passed, results.len());
                for result in results {
                    match &result.detail {
                        Some(detail) if !result.passed => {
                            println!("    FAIL {} - {}", result.name, detail)
                        }
                        _ => println!("    ok   {}", result.name),
                    }
                }
            }
            CapabilityOutcome::Untested { reason } => {
                println!("  {} (untested: {})", cap.capability, reason);
            }
        }
    }
}
