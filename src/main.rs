mod ai;
mod analyzer;
mod cache;
mod config;
mod db;
mod error;
mod extract;
mod gate;
mod insights;
mod models;
mod normalize;
mod page;
mod remote;
mod render;
mod session;
mod tools;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, Overrides};
use extract::sync_event_and_companies;
use analyzer::Analyzer;
use gate::Mode;
use insights::InsightGenerator;
use models::ListFilters;
use remote::RemoteRequest;
use session::{Session, SyncStatus};
use tools::{ToolCall, ToolDispatcher, tool_definitions};

#[derive(Parser)]
#[command(name = "eventscope")]
#[command(about = "Capture, cache and sync event intelligence from event pages")]
struct Cli {
    /// Data directory (defaults to EVENTSCOPE_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// User id that owns synced events
    #[arg(long, global = true)]
    user: Option<String>,

    /// AI model (claude-sonnet, claude-haiku, api-sonnet, api-haiku, gpt-4o, gpt-4o-mini)
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PageArgs {
    /// Event page URL
    url: String,

    /// Read the page from a saved HTML file instead of fetching it
    #[arg(long, conflicts_with = "text")]
    html: Option<PathBuf>,

    /// Read the page from a plain-text file instead of fetching it
    #[arg(long)]
    text: Option<PathBuf>,

    /// Page title, when not taken from the HTML
    #[arg(long)]
    title: Option<String>,

    /// Extra context for the analyzer (who you are, what you sell)
    #[arg(long)]
    context: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the event database
    Init,

    /// Visit a page: use the cache, or pre-check and analyze it
    Visit(PageArgs),

    /// Force a fresh analysis of a page that is already cached
    Reanalyze(PageArgs),

    /// Analyze a page that was classified as not an event
    Override(PageArgs),

    /// Show a cached event
    Show {
        url: String,
    },

    /// List cached events
    Cached,

    /// List analyses in progress
    Pending,

    /// Replace a cached event with an edited JSON document
    Edit {
        url: String,
        /// JSON file holding the edited event
        file: PathBuf,
    },

    /// Remove an event from the local cache
    Forget {
        url: String,
    },

    /// Push a cached event and its companies to the event database
    Sync {
        url: String,
    },

    /// Show the synced copy of an event
    Pull {
        url: String,
    },

    /// Execute a JSON request against the event database and print the envelope
    Remote {
        /// JSON request file ("-" for stdin)
        request: PathBuf,
    },

    /// List synced events
    Events {
        /// Earliest start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Latest start date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        #[arg(short, long)]
        limit: Option<u32>,

        #[arg(long)]
        offset: Option<u32>,
    },

    /// Delete a synced event and its dependents
    Remove {
        url: String,
    },

    /// Call a company tool by name
    Tool {
        name: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// List available company tools
    Tools,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("eventscope=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::resolve(Overrides {
        data_dir: cli.data_dir,
        user_id: cli.user,
        model: cli.model,
    })?;
    let mut session = Session::open(config)?;

    match cli.command {
        Commands::Init => {
            session.db.init()?;
            println!("Database initialized at {}", session.db.path().display());
        }

        Commands::Visit(args) => run_gate(&mut session, args, Mode::Visit)?,
        Commands::Reanalyze(args) => run_gate(&mut session, args, Mode::Reanalyze)?,
        Commands::Override(args) => run_gate(&mut session, args, Mode::Override)?,

        Commands::Show { url } => {
            let rendered = session.cache.get(&url).map(render::render_event);
            match rendered {
                Some(text) => {
                    print!("{}", text);
                    session.cache.touch_viewed(&url)?;
                }
                None => match session.cache.skip_record(&url) {
                    Some(skip) => println!("Skipped on {}: {}", skip.skipped_at, skip.reason),
                    None => println!("Not cached: {}", url),
                },
            }
        }

        Commands::Cached => {
            let events = session.cache.list_events();
            if events.is_empty() {
                println!("No cached events.");
            } else {
                println!("{:<32} {:<14} {:<36}", "NAME", "DATE", "URL");
                println!("{}", "-".repeat(84));
                for event in events {
                    println!(
                        "{:<32} {:<14} {:<36}",
                        render::truncate(&event.name, 30),
                        render::truncate(event.date.as_deref().unwrap_or("-"), 12),
                        render::truncate(&event.url, 36)
                    );
                }
            }
        }

        Commands::Pending => println!("{}", render::render_pending(&session.cache.list_pending())),

        Commands::Edit { url, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let event = session.cache.apply_edit(&url, &raw)?;
            println!("Updated cached event: {}", event.name);
        }

        Commands::Forget { url } => {
            if session.cache.delete(&url)? {
                println!("Removed {} from the cache", url);
            } else {
                println!("Not cached: {}", url);
            }
        }

        Commands::Sync { url } => {
            session.db.ensure_initialized()?;
            let event = session
                .cache
                .get(&url)
                .ok_or_else(|| anyhow!("Not cached: {}", url))?;
            let (event_id, companies) = sync_event_and_companies(&session.db, &session.config.user_id, event)?;
            println!("Synced event #{} ({} companies)", event_id, companies);
        }

        Commands::Pull { url } => {
            session.db.ensure_initialized()?;
            match session.db.load_event(&session.config.user_id, &url)? {
                Some(event) => print!("{}", render::render_event(&event)),
                None => println!("Not synced: {}", url),
            }
        }

        Commands::Remote { request } => {
            session.db.ensure_initialized()?;
            let raw = if request.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                std::fs::read_to_string(&request)
                    .with_context(|| format!("Failed to read {}", request.display()))?
            };
            let request: RemoteRequest = serde_json::from_str(&raw).context("Invalid remote request")?;
            let envelope = remote::handle(&session.db, request);
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }

        Commands::Events { from, to, limit, offset } => {
            session.db.ensure_initialized()?;
            let filters = ListFilters { from, to, limit, offset };
            let events = session.db.list_events(&session.config.user_id, &filters)?;
            print!("{}", render::render_summaries(&events));
        }

        Commands::Remove { url } => {
            session.db.ensure_initialized()?;
            if session.db.delete_event(&session.config.user_id, &url)? {
                println!("Deleted synced event {}", url);
            } else {
                println!("Not synced: {}", url);
            }
        }

        Commands::Tool { name, args } => {
            session.db.ensure_initialized()?;
            let arguments = serde_json::from_str(&args).context("--args must be a JSON object")?;
            let generator = match session.insights() {
                Ok(generator) => Some(generator),
                Err(e) => {
                    warn!(error = %e, "Insight generator unavailable");
                    None
                }
            };
            let dispatcher = ToolDispatcher::new(
                &session.db,
                generator.as_ref().map(|g| g as &dyn InsightGenerator),
            );
            let response = dispatcher.dispatch(&ToolCall { name, arguments });
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.is_error {
                std::process::exit(1);
            }
        }

        Commands::Tools => {
            for tool in tool_definitions() {
                println!("{:<18} {}", tool.name, tool.description);
            }
        }
    }

    Ok(())
}

/// Drive the gate for one page and print the outcome. The page is only
/// loaded, and the model only set up, when the cache cannot answer.
fn run_gate(session: &mut Session, args: PageArgs, mode: Mode) -> Result<()> {
    let PageArgs { url, html, text, title, context } = args;
    let capture = session.capture(&url, mode, context, |s| {
        let page = s.page(&url, html.as_deref(), text.as_deref(), title)?;
        let analyzer: Box<dyn Analyzer> = Box::new(s.analyzer()?);
        Ok((page, analyzer))
    })?;
    println!("{}", render::render_outcome(&capture.outcome));

    match capture.sync {
        SyncStatus::StoreNotInitialized => {
            info!("Event database not initialized; run 'eventscope init' to enable sync")
        }
        SyncStatus::Failed(message) => {
            eprintln!("Sync failed (kept locally, retry with 'eventscope sync {}'): {}", url, message)
        }
        SyncStatus::NotAttempted | SyncStatus::Synced { .. } => {}
    }
    Ok(())
}
