//! # Cursus - Academic Progression Daemon
//!
//! The main binary for the Cursus progression engine.
//!
//! This application provides:
//! - A daemon that runs the daily sweep (tokio-based scheduler)
//! - CLI commands for closures, recovery decisions and grades
//! - Directory ingestion, export and import
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      apps/cursus (THE BINARY)                   │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────────┐    ┌──────────────┐    │
//! │  │   CLI       │    │ Sweep Scheduler │    │   Config     │    │
//! │  │  (clap)     │    │    (tokio)      │    │   (toml)     │    │
//! │  └──────┬──────┘    └────────┬────────┘    └──────┬───────┘    │
//! │         │                    │                    │            │
//! │         └────────────────────┼────────────────────┘            │
//! │                              ▼                                 │
//! │                      ┌───────────────┐                         │
//! │                      │  cursus-core  │                         │
//! │                      │ (THE LOGIC)   │                         │
//! │                      └───────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Run the daily sweep until Ctrl+C
//! cursus daemon --run-hour 2
//!
//! # CLI operations
//! cursus ingest -f directory.json
//! cursus sweep --date 2025-03-31
//! cursus approve -r 12
//! cursus grade -s 7 -c 100 --subject 10 -o approved
//! ```

use clap::Parser;
use cursus::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize tracing: CURSUS_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("CURSUS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "cursus=debug,cursus_core=debug"
    } else {
        "cursus=info,cursus_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    // Display startup banner
    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!(kind = ?e.kind(), "Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Cursus startup banner.
fn print_banner() {
    println!(
        r#"
   ██████╗██╗   ██╗██████╗ ███████╗██╗   ██╗███████╗
  ██╔════╝██║   ██║██╔══██╗██╔════╝██║   ██║██╔════╝
  ██║     ██║   ██║██████╔╝███████╗██║   ██║███████╗
  ██║     ██║   ██║██╔══██╗╚════██║██║   ██║╚════██║
  ╚██████╗╚██████╔╝██║  ██║███████║╚██████╔╝███████║
   ╚═════╝ ╚═════╝ ╚═╝  ╚═╝╚══════╝ ╚═════╝ ╚══════╝

  Academic Progression Engine v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
