use anyhow::Context;
use care_core::{CareServices, CoreConfig, Settings};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use terminology::{ConceptQuery, LookupOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "care")]
#[command(about = "Episode-of-care, clinical timeline and terminology CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up one concept in the terminology catalog
    Concept {
        /// Owning organization, e.g. CIEL
        org: String,
        /// Concept source
        source: String,
        /// Concept id
        concept: String,
        /// Include mappings in the response
        #[arg(long)]
        include_mappings: bool,
    },
    /// Search concepts in a source
    Concepts {
        org: String,
        source: String,
        /// Free-text query
        #[arg(long)]
        q: Option<String>,
        /// Restrict to a concept class, e.g. Diagnosis
        #[arg(long)]
        concept_class: Option<String>,
        #[arg(long)]
        include_retired: bool,
        /// Page size
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Active episodes of a patient
    OpenEpisodes {
        /// Patient id or `Patient/<id>`
        patient: String,
    },
    /// Clinical resources recorded during one encounter
    Visit {
        /// Encounter id or `Encounter/<id>`
        encounter: String,
        #[arg(long)]
        max_page_size: Option<u32>,
    },
    /// Encounters of an episode, newest first, with their visit summaries
    Timeline {
        /// Episode id or `EpisodeOfCare/<id>`
        episode: String,
        /// Only the most recent encounters
        #[arg(long)]
        count: Option<u32>,
    },
    /// Problem list of a patient
    Problems { patient: String },
    /// Allergy list of a patient
    Allergies { patient: String },
    /// Everything the store holds for a patient, as returned by the store
    Everything { patient: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the JSON result; diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cfg = CoreConfig::from_settings(Settings::from_env())
        .context("invalid configuration")?;
    let services = CareServices::from_config(&cfg).context("failed to build care services")?;

    run(cli.command, &services, &cfg).await
}

async fn run(command: Commands, services: &CareServices, cfg: &CoreConfig) -> anyhow::Result<()> {
    let deadline = cfg.request_timeout();
    match command {
        Commands::Concept {
            org,
            source,
            concept,
            include_mappings,
        } => {
            let options = LookupOptions {
                include_mappings,
                ..LookupOptions::default()
            };
            let concept = services
                .terminology()
                .get_concept(&org, &source, &concept, &options)
                .await?;
            print_json(&concept)
        }
        Commands::Concepts {
            org,
            source,
            q,
            concept_class,
            include_retired,
            limit,
        } => {
            let query = ConceptQuery {
                q,
                concept_class,
                include_retired,
                limit,
                ..ConceptQuery::default()
            };
            let page = services
                .terminology()
                .list_concepts(&org, &source, &query)
                .await?;
            print_json(&page)
        }
        Commands::OpenEpisodes { patient } => {
            let episodes =
                care_core::with_deadline(deadline, services.episodes().open_episodes(&patient))
                    .await?;
            print_json(&episodes)
        }
        Commands::Visit {
            encounter,
            max_page_size,
        } => {
            let view = care_core::with_deadline(
                deadline,
                services.timeline().visit_summary(&encounter, max_page_size),
            )
            .await?;
            if !view.is_complete() {
                tracing::warn!(failed = ?view.failures.keys().collect::<Vec<_>>(), "visit summary is partial");
            }
            print_json(&view)
        }
        Commands::Timeline { episode, count } => {
            let entries = care_core::with_deadline(
                deadline,
                services.timeline().patient_timeline_with_count(&episode, count),
            )
            .await?;
            print_json(&entries)
        }
        Commands::Problems { patient } => {
            let problems =
                care_core::with_deadline(deadline, services.timeline().problem_summary(&patient))
                    .await?;
            print_json(&problems)
        }
        Commands::Allergies { patient } => {
            let allergies =
                care_core::with_deadline(deadline, services.timeline().allergy_summary(&patient))
                    .await?;
            print_json(&allergies)
        }
        Commands::Everything { patient } => {
            let bundle =
                care_core::with_deadline(deadline, services.patient_everything(&patient)).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bundle)?;
            writeln!(stdout)?;
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
