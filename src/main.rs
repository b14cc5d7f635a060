//! listing-intake CLI: reconcile listing notification emails into deal records.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use listing_intake::config::{
    DEFAULT_CONFIG_FILE, ENV_MAIL_PASSWORD, ENV_STORE_API_KEY, IntakeConfig, load_dotenv, secret,
};
use listing_intake::extract::extract;
use listing_intake::ledger::JsonLedger;
use listing_intake::mail::{ImapSource, parse_message};
use listing_intake::matcher::{PropertySnapshot, similarity_ratio};
use listing_intake::pipeline::Intake;
use listing_intake::store::AirtableStore;
use listing_intake::template::TemplateCatalog;

const SAMPLE_NEW_LISTING: &str = include_str!("../templates/new_listing.toml");
const SAMPLE_PRICE_DROP: &str = include_str!("../templates/price_drop.toml");

#[derive(Parser)]
#[command(
    name = "listing-intake",
    version,
    about = "Reconcile listing notification emails into deal records"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and sample templates.
    Init,

    /// Process one batch of unprocessed messages.
    Run,

    /// Process a batch every check interval until interrupted.
    Watch,

    /// Load and validate templates, listing them in match order.
    Templates,

    /// Classify and extract a raw .eml file without touching the store.
    Parse {
        /// Path to an RFC 5322 message.
        #[arg(long)]
        file: PathBuf,
    },

    /// Resolve an address against the live property list.
    Match {
        /// Street address to resolve.
        #[arg(long)]
        address: String,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init(&cli.config)?,

        Commands::Run => {
            let config = load_config(&cli.config)?;
            let catalog = TemplateCatalog::load_dir(&config.templates_dir).into_diagnostic()?;
            let mut intake = Intake::new(catalog, airtable(&config)?).into_diagnostic()?;
            let mut ledger = JsonLedger::open(&config.ledger_path).into_diagnostic()?;
            let mut source = imap_source(&config)?;

            let summary = intake
                .run_batch(&mut source, &mut ledger)
                .into_diagnostic()?;
            println!("{summary}");
            for (id, error) in &summary.failed {
                println!("  failed {id}: {error}");
            }
        }

        Commands::Watch => {
            let config = load_config(&cli.config)?;
            let catalog = TemplateCatalog::load_dir(&config.templates_dir).into_diagnostic()?;
            let mut intake = Intake::new(catalog, airtable(&config)?).into_diagnostic()?;
            let mut ledger = JsonLedger::open(&config.ledger_path).into_diagnostic()?;
            let mut source = imap_source(&config)?;
            let interval = config.mail.check_interval();

            println!(
                "Watching {} (every {} min)",
                config.mail.address, config.mail.check_interval_minutes
            );
            loop {
                match intake.run_batch(&mut source, &mut ledger) {
                    Ok(summary) => println!("{summary}"),
                    Err(e) => tracing::error!(error = %e, "run failed; retrying next interval"),
                }
                std::thread::sleep(interval);
            }
        }

        Commands::Templates => {
            let config = load_config_unchecked(&cli.config)?;
            let catalog = TemplateCatalog::load_dir(&config.templates_dir).into_diagnostic()?;
            println!("{} template(s), in match order:", catalog.len());
            for t in catalog.iter() {
                let fields: Vec<&str> = t.field_patterns().map(|(name, _)| name).collect();
                println!(
                    "  [{:>3}] {:<20} -> \"{}\" ({})",
                    t.priority(),
                    t.name(),
                    t.trigger_label(),
                    fields.join(", ")
                );
            }
        }

        Commands::Parse { file } => {
            let config = load_config_unchecked(&cli.config)?;
            let catalog = TemplateCatalog::load_dir(&config.templates_dir).into_diagnostic()?;
            let data = std::fs::read(&file).into_diagnostic()?;
            let message = parse_message(&file.display().to_string(), &data).into_diagnostic()?;

            println!("id:      {}", message.id);
            println!("subject: {}", message.subject);
            match catalog.classify(&message.subject) {
                Some(template) => {
                    println!("template: {}", template.name());
                    let event = extract(&message.text(), template);
                    let json = serde_json::to_string_pretty(&event).into_diagnostic()?;
                    println!("{json}");
                }
                None => println!("template: (none matched)"),
            }
        }

        Commands::Match { address } => {
            let config = load_config(&cli.config)?;
            let store = airtable(&config)?;
            let snapshot = PropertySnapshot::load(&store).into_diagnostic()?;
            println!("{} properties loaded", snapshot.len());
            match snapshot.find_best_match(&address) {
                Some(property) => {
                    let score = property
                        .address
                        .as_deref()
                        .map(|a| similarity_ratio(&address.to_lowercase(), &a.to_lowercase()))
                        .unwrap_or(0);
                    println!(
                        "match: {} \"{}\" (score {score})",
                        property.id,
                        property.address.as_deref().unwrap_or("")
                    );
                }
                None => println!("no property scored at or above the threshold"),
            }
        }
    }

    Ok(())
}

fn load_config_unchecked(path: &Path) -> Result<IntakeConfig> {
    let mut config = IntakeConfig::load(path).into_diagnostic()?;
    config.resolve_paths(path);
    Ok(config)
}

fn load_config(path: &Path) -> Result<IntakeConfig> {
    let config = load_config_unchecked(path)?;
    config.validate().into_diagnostic()?;
    Ok(config)
}

fn airtable(config: &IntakeConfig) -> Result<AirtableStore> {
    let key = secret(ENV_STORE_API_KEY).into_diagnostic()?;
    Ok(AirtableStore::new(config.store.clone(), key))
}

fn imap_source(config: &IntakeConfig) -> Result<ImapSource> {
    let password = secret(ENV_MAIL_PASSWORD).into_diagnostic()?;
    Ok(ImapSource::new(config.mail.clone(), password))
}

fn init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("{} already exists; leaving it untouched", config_path.display());
    } else {
        IntakeConfig::default().save(config_path).into_diagnostic()?;
        println!("Wrote {}", config_path.display());
    }

    let mut config = IntakeConfig::default();
    config.resolve_paths(config_path);
    std::fs::create_dir_all(&config.templates_dir).into_diagnostic()?;
    for (file, text) in [
        ("new_listing.toml", SAMPLE_NEW_LISTING),
        ("price_drop.toml", SAMPLE_PRICE_DROP),
    ] {
        let path = config.templates_dir.join(file);
        if !path.exists() {
            std::fs::write(&path, text).into_diagnostic()?;
            println!("Wrote {}", path.display());
        }
    }

    println!(
        "Set {ENV_MAIL_PASSWORD} and {ENV_STORE_API_KEY} in the environment or a .env file, \
         then fill in mail.address and store.base_id."
    );
    Ok(())
}
