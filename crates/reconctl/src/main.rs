//! reconctl - CLI client for the recond daemon.

mod client;
mod render;

use clap::{Parser, Subcommand};
use client::{AddSubdomainRequest, Client, ClientError};
use recon_core::types::ScanMode;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CLI client for the recond reconnaissance daemon.
#[derive(Parser)]
#[command(name = "reconctl")]
#[command(about = "Control plane for the recond scan orchestrator")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:7700)
    #[arg(long, global = true, env = "RECOND_ADDR")]
    addr: Option<String>,

    /// Auth token for the daemon API
    #[arg(long, global = true, env = "RECOND_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a scan for one apex domain
    Scan {
        /// Target apex domain (e.g. example.com)
        domain: String,
    },

    /// Submit scans for several domains at once
    Bulk {
        /// Target apex domains; malformed ones are skipped
        domains: Vec<String>,
    },

    /// List scan jobs
    List {
        /// Page size
        #[arg(long, default_value_t = 100)]
        limit: i64,

        /// Page offset
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Show full results for a scan job
    Show {
        /// Job ID
        job_id: String,
    },

    /// Show live progress for a scan job
    Progress {
        /// Job ID
        job_id: String,
    },

    /// Delete a scan job, its results, and its artifact directory
    Delete {
        /// Job ID
        job_id: String,
    },

    /// Run a selective leak scan on URLs from a completed job
    LeakScan {
        /// Job ID
        job_id: String,

        /// URLs to scan (repeatable); must be live hosts of the job
        #[arg(long = "url", required = true)]
        urls: Vec<String>,

        /// Scan mode: tiny or full
        #[arg(long, default_value = "tiny", value_parser = parse_mode)]
        mode: ScanMode,
    },

    /// Manually add a subdomain to an existing job
    AddSubdomain {
        /// Job ID
        job_id: String,

        /// Subdomain (bare hostname or URL)
        subdomain: String,

        /// Mark the subdomain live (or dead with `--live false`)
        #[arg(long)]
        live: Option<bool>,

        /// HTTP status code observed
        #[arg(long)]
        http_status: Option<i64>,
    },

    /// Check daemon health
    Health,
}

fn parse_mode(s: &str) -> Result<ScanMode, String> {
    ScanMode::parse(s).ok_or_else(|| format!("mode must be 'tiny' or 'full', got '{s}'"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let addr = cli
        .addr
        .unwrap_or_else(|| "http://127.0.0.1:7700".to_string());
    let client = Client::new(&addr, cli.token.as_deref());

    if let Err(e) = run(&client, cli.command).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(client: &Client, command: Command) -> Result<(), ClientError> {
    match command {
        Command::Scan { domain } => {
            let created = client.create_scan(&domain).await?;
            render::print_scan_created(&created);
        }
        Command::Bulk { domains } => {
            let result = client.create_bulk_scans(&domains).await?;
            render::print_bulk_result(&result);
        }
        Command::List { limit, offset } => {
            let items = client.list_scans(limit, offset).await?;
            render::print_scan_list(&items);
        }
        Command::Show { job_id } => {
            let result = client.get_scan(&job_id).await?;
            render::print_scan_result(&result);
        }
        Command::Progress { job_id } => {
            let progress = client.get_progress(&job_id).await?;
            render::print_progress(&progress);
        }
        Command::Delete { job_id } => {
            client.delete_scan(&job_id).await?;
            println!("Deleted scan job {job_id}");
        }
        Command::LeakScan {
            job_id,
            urls,
            mode,
        } => {
            let started = client.run_leak_scan(&job_id, &urls, mode).await?;
            println!("Leak scan started: task {}", started.task_id);
            println!("  URLs to scan: {}", started.urls_to_scan);
            println!("  Mode:         {}", started.mode);
            println!("  {}", started.message);
        }
        Command::AddSubdomain {
            job_id,
            subdomain,
            live,
            http_status,
        } => {
            let added = client
                .add_subdomain(
                    &job_id,
                    &AddSubdomainRequest {
                        subdomain,
                        is_live: live,
                        http_status,
                    },
                )
                .await?;
            println!("{}", added.message);
            println!("  Status: {} (live: {})", added.status, added.is_live);
        }
        Command::Health => {
            if client.check_health().await? {
                println!("daemon is healthy");
            } else {
                println!("daemon responded unhealthy");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
