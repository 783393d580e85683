mod incident;
mod serve;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use capa_core::{rules, ActorGate};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Corrective action workflow service.
#[derive(Parser)]
#[command(name = "capa", version, about = "Corrective action workflow service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the CAPA HTTP API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Base URL of the external incident service. When omitted, every
        /// incident id is accepted and close requests succeed locally.
        #[arg(long)]
        incident_url: Option<String>,

        /// Path to TLS certificate PEM file (requires --tls-key)
        #[arg(long)]
        tls_cert: Option<PathBuf>,

        /// Path to TLS private key PEM file (requires --tls-cert)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Print the transition rule table
    Rules {
        /// Output format (text or json)
        #[arg(long, default_value = "text", value_enum)]
        output: OutputFormat,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            incident_url,
            tls_cert,
            tls_key,
        } => {
            // Validate TLS flags: both must be provided or neither
            if tls_cert.is_some() != tls_key.is_some() {
                eprintln!("error: --tls-cert and --tls-key must both be provided");
                process::exit(1);
            }
            let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
            if let Err(e) = rt.block_on(serve::start_server(port, incident_url, tls_cert, tls_key))
            {
                eprintln!("Server error: {}", e);
                process::exit(1);
            }
        }
        Commands::Rules { output } => cmd_rules(output),
    }
}

fn gate_label(gate: ActorGate) -> String {
    match gate {
        ActorGate::Assignee => "assignee".to_string(),
        ActorGate::Roles(roles) => {
            let names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
            names.join(", ")
        }
    }
}

/// Print the transition rule table, the one source of truth for who may
/// move a corrective action between which states.
fn cmd_rules(output: OutputFormat) {
    match output {
        OutputFormat::Json => {
            let table: Vec<serde_json::Value> = rules()
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "from": r.from.as_str(),
                        "event": r.event.as_str(),
                        "to": r.to.as_str(),
                        "gate": gate_label(r.gate),
                    })
                })
                .collect();
            let value = serde_json::json!({ "rules": table });
            println!(
                "{}",
                serde_json::to_string_pretty(&value).expect("serialize rule table")
            );
        }
        OutputFormat::Text => {
            for r in rules() {
                println!(
                    "{:<12} --{:<9}-> {:<12} [{}]",
                    r.from.as_str(),
                    r.event.as_str(),
                    r.to.as_str(),
                    gate_label(r.gate)
                );
            }
        }
    }
}
