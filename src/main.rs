//! Campus - keep your student portal with you, offline

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use campus::api::HttpTransport;
use campus::config::Config;
use campus::credentials::FileCredentials;
use campus::grades::GradeDraft;
use campus::model::{Evaluation, Event, Exam, Notice, ScheduleEntry, Subject};
use campus::portal::{Portal, Resource};
use campus::storage::Store;
use campus::trigger::{PeriodicSync, Stopped, TriggerOutcome};

/// Campus - offline copy of your university portal
#[derive(Parser, Debug)]
#[command(name = "campus")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Config file (default: platform config dir)
    #[arg(short = 'c', long, env = "CAMPUS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug)
    #[arg(short = 'd', long)]
    debug: bool,

    /// Enable verbose logging (equivalent to RUST_LOG=trace)
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in with an authorization code; without one, print where to get it
    Login { code: Option<String> },
    /// Log out and drop all data downloaded from the portal
    Logout,
    /// Refresh the access token now
    Refresh,
    /// Sync one resource, or everything
    Sync { resource: Option<Resource> },
    /// Print the local copy of a resource
    Show { resource: Resource },
    /// Sync periodically until interrupted
    Daemon,
    /// Local grade book
    #[command(subcommand)]
    Eval(EvalCommand),
    /// Print the config file location and an example config
    Config,
}

#[derive(Subcommand, Debug)]
enum EvalCommand {
    /// List evaluations, optionally for one subject
    List { subject: Option<String> },
    /// Create an empty evaluation for a subject
    Add { subject: String, name: String },
    /// Delete an evaluation and its grades
    Remove { id: u64 },
    /// Rename an evaluation
    Rename { id: u64, name: String },
    /// Replace the grades of an evaluation
    Set {
        id: u64,
        /// name:weight[:mark[:description]], repeatable. Leave mark empty if not graded yet
        #[arg(short = 'g', long = "grade")]
        grades: Vec<String>,
    },
    /// Show grades, final mark and the mark still needed to pass
    Show { id: u64 },
}

fn init_tracing(args: &Args) {
    let default_filter = if args.verbose {
        "trace"
    } else if args.debug {
        "debug,hyper_util=info,reqwest=info"
    } else {
        "warn,campus=info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };
    let config = Config::load_from(&config_path)?;

    match args.command {
        Command::Config => {
            println!("# {}", config_path.display());
            print!("{}", Config::example_config());
        }
        Command::Login { code: None } => {
            if config.api.client_id.is_empty() {
                bail!("set api.client_id in {} first", config_path.display());
            }
            println!("Open this URL, authorize, and run `campus login <CODE>`:");
            println!("{}", config.api.authorization_url());
        }
        Command::Login { code: Some(code) } => {
            open_portal(&config, &config_path)?.login(&code).await?;
            println!("Logged in.");
        }
        Command::Logout => {
            open_portal(&config, &config_path)?.logout().await?;
            println!("Logged out.");
        }
        Command::Refresh => match open_portal(&config, &config_path)?.refresh_token().await {
            TriggerOutcome::Success => println!("Token refreshed."),
            TriggerOutcome::Retry => bail!("token endpoint unreachable, try again later"),
            TriggerOutcome::Failure => bail!("session is no longer valid, log in again"),
        },
        Command::Sync { resource } => {
            let portal = open_portal(&config, &config_path)?;
            let summaries = match resource {
                Some(resource) => vec![portal.sync(resource).await],
                None => portal.sync_all().await,
            };
            for summary in &summaries {
                println!("{summary}");
                for notice in &summary.new_notices {
                    println!("  new: [{}] {}", notice.subject_code, notice.title);
                }
            }
            let failed = summaries
                .iter()
                .filter(|s| s.outcome != TriggerOutcome::Success)
                .count();
            if failed > 0 {
                bail!("{failed} of {} resources did not sync", summaries.len());
            }
        }
        Command::Show { resource } => show(&*open_portal(&config, &config_path)?, resource)?,
        Command::Daemon => {
            let portal = open_portal(&config, &config_path)?;
            if !portal.tokens().is_logged_in() {
                bail!("not logged in");
            }
            let runner = PeriodicSync::new(portal, config.sync.interval());
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            if runner.run(shutdown).await? == Stopped::LoggedOut {
                println!("Session ended, log in again to resume syncing.");
            }
        }
        Command::Eval(command) => eval(&*open_portal(&config, &config_path)?, command)?,
    }

    Ok(())
}

/// Open the store, restore the saved session and wire everything up.
fn open_portal(config: &Config, config_path: &Path) -> Result<Arc<Portal>> {
    let store = Store::open(&Store::default_path(&config.storage.data_dir()?))?;
    let transport = Arc::new(HttpTransport::new(config.api.timeout())?);
    let credentials = Arc::new(FileCredentials::beside(config_path));
    let portal = Arc::new(Portal::new(config, store, transport, credentials));
    portal
        .tokens()
        .restore()
        .context("Failed to load saved session")?;
    Ok(portal)
}

fn show(portal: &Portal, resource: Resource) -> Result<()> {
    match resource {
        Resource::Notices => {
            for n in portal.collection::<Notice>().all()? {
                println!("{} [{}] {}  ({})", n.id, n.subject_code, n.title, n.modified_at);
                for f in &n.attachments {
                    println!("    {} ({} bytes) {}", f.name, f.size_bytes, f.url);
                }
            }
        }
        Resource::Schedule => {
            let mut slots = portal.collection::<ScheduleEntry>().all()?;
            slots.sort_by(|a, b| (a.weekday, &a.start_time).cmp(&(b.weekday, &b.start_time)));
            for s in slots {
                println!(
                    "day {} {} {}h {} {} group {} {}",
                    s.weekday, s.start_time, s.duration_hours, s.subject_code, s.kind, s.group, s.rooms
                );
            }
        }
        Resource::Exams => {
            let mut exams = portal.collection::<Exam>().all()?;
            exams.sort_by_key(|e| e.start);
            for e in exams {
                println!("{} {} {} - {} {}", e.id, e.subject_code, e.start, e.end.time(), e.rooms);
            }
        }
        Resource::Events => {
            let mut events = portal.collection::<Event>().all()?;
            events.sort_by_key(|e| e.start);
            for e in events {
                println!("{} .. {} {}", e.start.date(), e.end.date(), e.name);
            }
        }
        Resource::Subjects => {
            for s in portal.collection::<Subject>().all()? {
                println!("{} {} ({} ECTS, group {})", s.acronym, s.name, s.credits, s.group);
            }
        }
    }
    Ok(())
}

fn print_evaluation(evaluation: &Evaluation) {
    println!("{} [{}] {}", evaluation.id, evaluation.subject_id, evaluation.name);
    for g in &evaluation.grades {
        let mark = g.mark.map(|m| format!("{m:.2}")).unwrap_or_else(|| "-".to_string());
        println!("    {:<24} {:>6.1}%  {:>6}  {}", g.name, g.weight, mark, g.description);
    }
}

fn eval(portal: &Portal, command: EvalCommand) -> Result<()> {
    let book = portal.grades();
    match command {
        EvalCommand::List { subject } => {
            let evaluations = match subject {
                Some(subject) => book.evaluations_for(&subject)?,
                None => book.evaluations()?,
            };
            for e in evaluations {
                println!("{} [{}] {} ({} grades)", e.id, e.subject_id, e.name, e.grades.len());
            }
        }
        EvalCommand::Add { subject, name } => {
            let evaluation = book.create_evaluation(&subject, &name)?;
            println!("Created evaluation {}", evaluation.id);
        }
        EvalCommand::Remove { id } => {
            if !book.delete_evaluation(id)? {
                bail!("no evaluation with id {id}");
            }
        }
        EvalCommand::Rename { id, name } => {
            if book.rename_evaluation(id, &name)?.is_none() {
                bail!("no evaluation with id {id}");
            }
        }
        EvalCommand::Set { id, grades } => {
            let evaluation = book
                .evaluation(id)?
                .with_context(|| format!("no evaluation with id {id}"))?;
            let drafts = grades
                .iter()
                .map(|spec| GradeDraft::parse_spec(spec).with_context(|| format!("invalid grade '{spec}'")))
                .collect::<Result<Vec<_>>>()?;
            let saved = book.save_evaluation(&evaluation, drafts)?;
            print_evaluation(&saved);
        }
        EvalCommand::Show { id } => {
            let evaluation = book
                .evaluation(id)?
                .with_context(|| format!("no evaluation with id {id}"))?;
            print_evaluation(&evaluation);
            println!("final mark: {:.2}", evaluation.final_mark());
            match evaluation.pass_mark() {
                Some(needed) => println!("needed on remaining weight to pass: {needed:.2}"),
                None => println!("passing is no longer reachable"),
            }
            let total = evaluation.total_weight();
            if (total - 100.0).abs() > 1e-6 {
                println!("note: weights add up to {total:.1}%");
            }
        }
    }
    Ok(())
}
