use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use hmv_core::{Credential, Difficulty};
use hmv_storage::{download_package, package_file_name, DownloadOutcome, HttpFetcher};
use hmv_sync::{
    configure_credentials, recent_first, write_export, AchievementFilter, AchievementStats,
    AuthenticatedTransport, ExportFormat, FlagVerdict, HmvConfig, ListingLevel, MachineQuery,
    SessionManager, SyncOrchestrator, WriteupRefresh,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod output;
mod progress;

use output::{heading, render, AchievementRow, MachineRow, WriteupRow};
use progress::DownloadProgress;

const TAG_CHOICES: [&str; 24] = [
    "bruteforce",
    "suid",
    "wordpress",
    "cron",
    "smb",
    "docker",
    "sudo",
    "web",
    "fileupload",
    "pathhijacking",
    "stego",
    "binary",
    "capabilities",
    "cve",
    "commandinjection",
    "portknocking",
    "ssti",
    "libraryhijack",
    "sqli",
    "lfi",
    "rce",
    "logpoisoning",
    "nfs",
    "xxe",
];

const RECENT_ACHIEVEMENTS: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "hmv")]
#[command(version)]
#[command(about = "HackMyVM command-line client")]
#[command(infer_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Configure HackMyVM credentials
    Config,
    /// Search or list machines
    Search {
        /// Server-side category: easy, medium, hard, windows, linux, size, hacked, all
        #[arg(short, long)]
        level: Option<ListingLevel>,
        /// Filter by tag
        #[arg(short, long, value_parser = TAG_CHOICES)]
        tag: Option<String>,
        /// Search by machine name (partial match)
        #[arg(short, long)]
        name: Option<String>,
        /// Client-side filter by difficulty
        #[arg(short, long = "filter-level")]
        filter_level: Option<Difficulty>,
        /// Page number
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Search writeups for a machine
    Writeup { machine_name: String },
    /// Download a machine package
    Download {
        machine_name: String,
        /// Directory to save the package in
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Submit a flag for a machine
    Flag {
        /// Flag to submit
        #[arg(short, long)]
        input: String,
        /// Machine the flag belongs to
        #[arg(long)]
        vm: String,
    },
    /// Show achievement statistics
    Stats {
        /// Update the local dataset before showing stats
        #[arg(short, long)]
        update: bool,
        /// Sync from this achievement id instead of the cached last id
        #[arg(short, long)]
        start_id: Option<u64>,
        /// Only records for this machine
        #[arg(long)]
        vm: Option<String>,
        /// Only records for this user
        #[arg(long)]
        user: Option<String>,
        /// List every matching record instead of the most recent ones
        #[arg(short, long)]
        all: bool,
    },
    /// Export all machines as JSON or CSV
    Export {
        /// Output file path (defaults to machines.json or machines.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,
    },
}

fn init_tracing() {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("hmv=info,hmv_sync=info,hmv_storage=info,hmv_adapters=warn"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[!] {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    let config = HmvConfig::from_env()?;
    config.ensure_home_dir().await?;

    match command {
        Commands::Config => configure(&config).await,
        Commands::Search {
            level,
            tag,
            name,
            filter_level,
            page,
        } => {
            let query = MachineQuery {
                page,
                level,
                name,
                tag,
                difficulty: filter_level,
            };
            search(&config, &query).await
        }
        Commands::Writeup { machine_name } => writeups(&config, &machine_name).await,
        Commands::Download {
            machine_name,
            output,
        } => download(&config, &machine_name, output).await,
        Commands::Flag { input, vm } => flag(&config, &vm, &input).await,
        Commands::Stats {
            update,
            start_id,
            vm,
            user,
            all,
        } => stats(&config, update, start_id, AchievementFilter { vm, user }, all).await,
        Commands::Export { output, format } => export(&config, output, format).await,
    }
}

async fn authenticate(config: &HmvConfig) -> Result<AuthenticatedTransport<HttpFetcher>> {
    let fetcher = HttpFetcher::new(config.http_client_config())?;
    Ok(SessionManager::from_config(fetcher, config)
        .obtain_session()
        .await?)
}

async fn configure(config: &HmvConfig) -> Result<()> {
    let username: String = Input::new()
        .with_prompt("HackMyVM username")
        .interact_text()?;
    let password: String = Password::new().with_prompt("HackMyVM password").interact()?;
    configure_credentials(
        &config.credential_store(),
        &config.session_store(),
        &Credential::new(username.trim(), password),
    )
    .await?;
    println!(
        "[+] Credentials saved to {}",
        config.credentials_path().display()
    );
    Ok(())
}

async fn search(config: &HmvConfig, query: &MachineQuery) -> Result<()> {
    let session = authenticate(config).await?;
    let orchestrator = SyncOrchestrator::from_config(config);
    let page = orchestrator.list_machines(&session, query).await?;

    if page.machines.is_empty() {
        println!("[!] No machines found matching the criteria.");
        return Ok(());
    }
    println!("{}", render(page.machines.iter().map(MachineRow::from)));
    if page.total_pages > 1 {
        println!("\n[*] Page {} of {}", page.page, page.total_pages);
    }
    Ok(())
}

async fn writeups(config: &HmvConfig, machine_name: &str) -> Result<()> {
    let orchestrator = SyncOrchestrator::from_config(config);
    let now = Utc::now();

    let mut have_cache = orchestrator.has_writeups().await;
    if orchestrator.writeups_need_refresh(now).await {
        match authenticate(config).await {
            Ok(session) => {
                if let WriteupRefresh::Refreshed(count) =
                    orchestrator.refresh_writeups(&session, now).await
                {
                    println!("[+] Writeup data updated ({count} records)");
                    have_cache = true;
                }
            }
            Err(err) if have_cache => {
                warn!(error = %format!("{err:#}"), "cannot refresh writeups; using cached data");
            }
            Err(err) => return Err(err),
        }
    }

    if !have_cache {
        bail!("no writeup data available");
    }
    let matches = orchestrator.search_writeups(machine_name).await?;
    if matches.is_empty() {
        println!("[!] No writeups found for machine: '{machine_name}'");
        return Ok(());
    }

    heading(&format!(
        "Found {} writeup(s) for '{machine_name}':",
        matches.len()
    ));
    println!("{}", render(matches.into_iter().map(WriteupRow::from)));
    Ok(())
}

async fn download(config: &HmvConfig, machine_name: &str, output: PathBuf) -> Result<()> {
    let url = config.endpoints().package_url(machine_name);
    let dest = output.join(package_file_name(machine_name));
    println!("[*] Downloading {machine_name} from {url}");

    let mut bar = DownloadProgress::new(machine_name);
    let outcome = download_package(&config.http_client_config(), &url, &dest, |done, total| {
        bar.update(done, total)
    })
    .await;
    bar.finish();

    match outcome? {
        DownloadOutcome::Saved { path, bytes } => {
            println!("[+] Saved {} ({bytes} bytes)", path.display());
            Ok(())
        }
        DownloadOutcome::Redirected { status, location } => bail!(
            "download host redirected ({status}) to {}; the package may require a browser session",
            location.as_deref().unwrap_or("an unknown location")
        ),
        DownloadOutcome::NotFound { status } => {
            bail!("machine '{machine_name}' not found on the download host (HTTP {status})")
        }
    }
}

async fn flag(config: &HmvConfig, vm: &str, flag: &str) -> Result<()> {
    let session = authenticate(config).await?;
    let verdict = SyncOrchestrator::from_config(config)
        .submit_flag(&session, vm, flag)
        .await?;
    match verdict {
        FlagVerdict::Correct => println!("[+] The flag is CORRECT!"),
        FlagVerdict::Wrong => println!("[!] The flag is incorrect."),
        FlagVerdict::Unknown => println!("[!] Unknown response from server."),
    }
    Ok(())
}

async fn stats(
    config: &HmvConfig,
    update: bool,
    start_id: Option<u64>,
    filter: AchievementFilter,
    show_all: bool,
) -> Result<()> {
    let orchestrator = SyncOrchestrator::from_config(config);
    let have_cache = orchestrator.has_achievements().await;

    if update || !have_cache {
        let fetcher = HttpFetcher::new(config.http_client_config())?;
        match orchestrator.sync_achievements(&fetcher, start_id).await {
            Ok(report) => println!(
                "[*] Achievement data synced: {} new record(s) after id {}",
                report.appended, report.start_id
            ),
            Err(err) if have_cache => {
                warn!(error = %err, "achievement sync failed; using cached data");
            }
            Err(err) => return Err(err).context("downloading achievement data"),
        }
    }

    let records = filter.apply(orchestrator.read_achievements().await?);
    if records.is_empty() {
        let subject = match (&filter.vm, &filter.user) {
            (Some(vm), _) => format!(" for VM '{vm}'"),
            (None, Some(user)) => format!(" for user '{user}'"),
            (None, None) => String::new(),
        };
        println!("[!] No achievement records found{subject}.");
        return Ok(());
    }

    heading("Achievement Statistics");
    println!("[*] Data location: {}", config.achievements_path().display());
    let summary = AchievementStats::compute(&records);
    println!("[*] Total records: {}", summary.total);

    heading("Difficulty Breakdown");
    for (difficulty, count) in &summary.by_difficulty {
        println!("  {difficulty}: {count}");
    }

    if filter.vm.is_none() {
        heading("Rank Statistics");
        println!("  Author (rank 1):    {}", summary.authored);
        println!("  First (rank 2):     {}", summary.first_bloods);
        println!("  Top 3 (ranks 3-4):  {}", summary.top3);
    }

    let limit = (!show_all).then_some(RECENT_ACHIEVEMENTS);
    heading(if show_all {
        "All Achievements"
    } else {
        "Recent Achievements"
    });
    println!(
        "{}",
        render(recent_first(&records, limit).into_iter().map(AchievementRow::from))
    );
    Ok(())
}

async fn export(config: &HmvConfig, output: Option<PathBuf>, format: ExportFormat) -> Result<()> {
    let session = authenticate(config).await?;
    let machines = SyncOrchestrator::from_config(config)
        .export_machines(&session)
        .await?;
    if machines.is_empty() {
        bail!("the machine listing contained no machines");
    }
    let path = output.unwrap_or_else(|| PathBuf::from(format.default_file_name()));
    write_export(&machines, format, &path).await?;
    println!(
        "[+] Exported {} machines to {}",
        machines.len(),
        path.display()
    );
    Ok(())
}
