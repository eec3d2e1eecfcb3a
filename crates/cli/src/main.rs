use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use diego_api::{EnvSession, HostSession, ListOpts, ReqwestTransport};
use diego_core::{PresentableApp, Runtime};

#[derive(Parser, Debug)]
#[command(name = "diegoctl", version, about = "List applications with Diego enablement status")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Only list applications belonging to this organization
    #[arg(long = "org", global = true)]
    organization: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List apps annotated with their Diego enablement
    DiegoApps,
    /// List apps annotated with their DEA (legacy runtime) enablement
    DeaApps,
}

fn init_tracing() {
    let env = std::env::var("DIEGOCTL_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = match cli.command {
        Commands::DiegoApps => Runtime::Diego,
        Commands::DeaApps => Runtime::Dea,
    };
    info!(runtime = runtime.label(), org = ?cli.organization, "list invoked");

    let session = EnvSession;
    let skip_ssl = std::env::var("DIEGOCTL_SKIP_SSL_VALIDATION")
        .map(|v| v == "true")
        .unwrap_or(false);
    let transport = ReqwestTransport::new(skip_ssl)?;
    let opts = ListOpts { organization: cli.organization.clone() };

    // Any pipeline error aborts here: no table, non-zero exit.
    let rows = diego_api::list_apps(&session, &transport, &opts)?;

    match cli.output {
        Output::Human => print_table(&rows, runtime, &session, cli.organization.as_deref()),
        Output::Json => {
            #[derive(serde::Serialize)]
            struct Row<'a> {
                guid: &'a str,
                name: &'a str,
                space: Option<&'a str>,
                enabled: bool,
            }
            let out: Vec<_> = rows
                .iter()
                .map(|r| Row {
                    guid: &r.app.guid,
                    name: &r.app.name,
                    space: r.space_name(),
                    enabled: runtime.enabled(&r.app),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

fn print_table(rows: &[PresentableApp], runtime: Runtime, session: &EnvSession, org: Option<&str>) {
    match (session.username(), org) {
        (Some(user), Some(org)) => println!("Getting apps in org {} as {}...", org, user),
        (Some(user), None) => println!("Getting apps as {}...", user),
        (None, Some(org)) => println!("Getting apps in org {}...", org),
        (None, None) => println!("Getting apps..."),
    }
    println!();
    println!("{:<24} {:<20} {}", "NAME", "SPACE", runtime.label().to_uppercase());
    for row in rows {
        let space = row.space_name().unwrap_or("(unknown)");
        println!("{:<24} {:<20} {}", row.app.name, space, runtime.enabled(&row.app));
    }
}
