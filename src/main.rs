use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use accelenv::config::{AccelConfig, OPTION_KEYS};
use accelenv::selftest::TestStatus;

#[derive(Parser)]
#[command(
    name = "accelenv",
    about = "Shared compute accelerator environment diagnostics",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $ACCELENV_CONFIG, then /etc/accelenv/accelenv.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List platforms and devices
    Devices {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print effective options
    Options,

    /// Run the environment lifecycle self-test
    SelfTest {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = AccelConfig::resolve(cli.config.as_deref())?;
    let env = accelenv::host_env(&config);

    match cli.command {
        Commands::Devices { json } => {
            let catalog = env.get_device_list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                println!("\naccelenv Devices ({} backend)", env.backend().name());
                println!("{:<4} | {:<4} | {:<8} | Name", "Plat", "Dev", "Class");
                println!("{:-<4}-|-{:-<4}-|-{:-<8}-|-{:-<30}", "", "", "", "");
                for (p_idx, platform) in catalog.platforms.iter().enumerate() {
                    println!("{:<4} | {:<4} | {:<8} | {}", p_idx, "", "", platform.vendor);
                    for (d_idx, device) in platform.devices.iter().enumerate() {
                        println!("{:<4} | {:<4} | {:<8} | {}", "", d_idx, device.class, device.name);
                    }
                }
                println!();
            }
        }
        Commands::Options => {
            for key in OPTION_KEYS {
                println!("{} = {}", key, env.get_option(key)?);
            }
        }
        Commands::SelfTest { json } => {
            tracing::info!("Running compute environment self-test");
            let report = accelenv::selftest::run(&env);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\naccelenv Self-Test ({} backend)", report.backend);
                println!("{:<12} | {:<6} | Details", "Stage", "Status");
                println!("{:-<12}-|-{:-<6}-|-{:-<40}", "", "", "");
                for res in &report.results {
                    println!("{:<12} | {:<6} | {}", res.component, res.status.label(), res.details);
                    if let Some(rem) = &res.remediation {
                        println!("{:<12} | {:<6} |   -> Recommendation: {}", "", "", rem);
                    }
                }
                println!();
            }
            if !report.passed() {
                let failed = report
                    .results
                    .iter()
                    .filter(|r| r.status == TestStatus::Fail)
                    .count();
                bail!("self-test failed: {} stage(s) failed", failed);
            }
        }
    }

    Ok(())
}
