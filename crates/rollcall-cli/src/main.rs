use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use rollcall_core::AttendanceSession;
use rollcall_store::{GalleryStorage, JsonStore, SessionStorage};
use rollcalld::service::load_gray;
use rollcalld::{AttendanceService, Config, SessionBook, SessionPolicy};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Config file (default: $ROLLCALL_CONFIG or ~/.config/rollcall/rollcall.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a photo, replacing any previous enrollment
    Enroll {
        /// Identity id (e.g. a student number)
        id: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Photo containing exactly one clearly visible face
        image: PathBuf,
    },
    /// Run images through recognition as consecutive frames of one stream
    Process {
        #[arg(short, long, default_value = "cli")]
        stream: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Show attendance sessions for an identity or a day
    #[command(group(ArgGroup::new("filter").required(true).args(["identity", "date"])))]
    Sessions {
        #[arg(short, long)]
        identity: Option<String>,
        /// Day in YYYY-MM-DD form
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// List enrolled identities
    List,
    /// Re-extract every embedding from the stored reference images
    Reencode,
    /// Convert legacy gallery and attendance files to the current format
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load_from(cli.config).context("loading configuration")?;

    match cli.command {
        Commands::Enroll { id, name, image } => {
            let service = AttendanceService::open(&config).await?;
            let frame = load_gray(image).await?;
            let identity = service.enroll(&id, &name, frame).await?;
            println!(
                "Enrolled {} ({}), {}-dim embedding",
                identity.display_name,
                identity.id,
                identity.embeddings.first().map_or(0, |e| e.dims())
            );
        }
        Commands::Process { stream, images } => {
            let service = AttendanceService::open(&config).await?;
            for path in images {
                let frame = load_gray(path.clone()).await?;
                let recognitions = service.process_frame(&stream, frame).await?;
                tracing::debug!(path = %path.display(), confirmed = recognitions.len(), "frame processed");
                for recognition in recognitions {
                    println!("{}", serde_json::to_string(&recognition)?);
                }
            }
        }
        Commands::Sessions { identity, date } => {
            let store = store(&config);
            let book = SessionBook::from_sessions(SessionPolicy::default(), store.load_sessions()?);
            let sessions = match (identity, date) {
                (Some(id), _) => book.sessions_for_identity(&id),
                (None, Some(date)) => book.sessions_for_date(date),
                (None, None) => bail!("pass --identity or --date"),
            };
            print_sessions(&sessions);
        }
        Commands::List => {
            let identities = store(&config).load_gallery()?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for identity in identities {
                let enrolled = identity
                    .enrolled_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<16} {:<32} {}", identity.id, identity.display_name, enrolled);
            }
        }
        Commands::Reencode => {
            let service = AttendanceService::open(&config).await?;
            let report = service.reencode_all().await?;
            println!("Re-encoded {} identities", report.updated.len());
            for id in report.skipped {
                println!("  skipped {id}: no usable reference image");
            }
        }
        Commands::Migrate => {
            let store = store(&config);
            let identities = store.load_gallery().context("migrating gallery")?;
            let sessions = store.load_sessions().context("migrating sessions")?;
            println!(
                "{}: {} identities, {} sessions in current format",
                store.dir().display(),
                identities.len(),
                sessions.len()
            );
        }
    }

    Ok(())
}

fn store(config: &Config) -> JsonStore {
    JsonStore::new(&config.data_dir).with_migration(config.migration_policy())
}

fn print_sessions(sessions: &[AttendanceSession]) {
    if sessions.is_empty() {
        println!("No sessions");
        return;
    }
    for s in sessions {
        println!(
            "{}  {:<16} {:<32} {} - {}  {:>5.2} h",
            s.date,
            s.identity_id,
            s.display_name,
            s.first_seen.format("%H:%M:%S"),
            s.last_seen.format("%H:%M:%S"),
            s.duration_hours
        );
    }
}
