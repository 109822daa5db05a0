use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use vitals_core::readings::{self, Period};
use vitals_core::risk::{self, RiskAssessment, RiskTier};
use vitals_core::*;

#[derive(Parser)]
#[command(name = "vitals")]
#[command(about = "Vitals portal session and readings toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the latest reading of every subject in a readings file
    Classify {
        /// JSON Lines readings file
        readings: PathBuf,
    },

    /// Summarize risk tiers across a cohort
    Cohort {
        /// JSON Lines readings file
        readings: PathBuf,

        /// File with one subject id per line; listed subjects without readings count as no data
        #[arg(long)]
        roster: Option<PathBuf>,

        /// Only list subjects in this tier
        #[arg(long, value_enum)]
        tier: Option<TierArg>,

        /// Only list subjects whose id contains this text
        #[arg(long, default_value = "")]
        search: String,
    },

    /// Export readings to CSV
    Export {
        /// JSON Lines readings file
        readings: PathBuf,

        /// CSV file to write
        output: PathBuf,

        /// Only readings from the last day, week, month or quarter
        #[arg(long, value_parser = parse_period)]
        period: Option<Period>,
    },

    /// Inspect or clear the persisted session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Configuration checks
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show who is signed in
    Status,
    /// Remove the persisted session
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a configuration file (defaults to the standard location)
    Check {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Critical,
    Warning,
    Stable,
    NoData,
}

impl From<TierArg> for RiskAssessment {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Critical => RiskAssessment::Assessed(RiskTier::Critical),
            TierArg::Warning => RiskAssessment::Assessed(RiskTier::Warning),
            TierArg::Stable => RiskAssessment::Assessed(RiskTier::Stable),
            TierArg::NoData => RiskAssessment::NoData,
        }
    }
}

fn parse_period(s: &str) -> std::result::Result<Period, String> {
    s.parse::<Period>().map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    vitals_core::logging::init_with_level("warn");

    let cli = Cli::parse();

    match cli.command {
        Commands::Classify { readings } => cmd_classify(&readings),
        Commands::Cohort {
            readings,
            roster,
            tier,
            search,
        } => cmd_cohort(&readings, roster.as_deref(), tier, &search),
        Commands::Export {
            readings,
            output,
            period,
        } => cmd_export(&readings, &output, period),
        Commands::Session { action } => {
            let data_dir = match cli.data_dir {
                Some(dir) => dir,
                None => Config::load()?.data.data_dir,
            };
            tracing::debug!("Using data directory {:?}", data_dir);
            let mut store = FileSessionStore::in_data_dir(&data_dir);
            match action {
                SessionAction::Status => cmd_session_status(&store),
                SessionAction::Clear => cmd_session_clear(&mut store),
            }
        }
        Commands::Config {
            action: ConfigAction::Check { file },
        } => cmd_config_check(file.as_deref()),
    }
}

fn cmd_classify(path: &Path) -> Result<()> {
    let readings = read_readings(path)?;
    if readings.is_empty() {
        println!("No readings found.");
        return Ok(());
    }

    for entry in risk::assess_cohort(&[], &readings) {
        match entry.latest {
            Some(reading) => println!(
                "{:<24} {:<9} BP {}/{}  glucose {:.1}  pulse {}  ({})",
                entry.subject_id,
                entry.assessment.to_string(),
                reading.systolic,
                reading.diastolic,
                reading.glucose,
                reading.pulse,
                reading.timestamp.format("%Y-%m-%d %H:%M"),
            ),
            None => println!("{:<24} {}", entry.subject_id, entry.assessment),
        }
    }
    Ok(())
}

fn cmd_cohort(path: &Path, roster: Option<&Path>, tier: Option<TierArg>, search: &str) -> Result<()> {
    let readings = read_readings(path)?;
    let roster: Vec<String> = match roster {
        Some(roster_path) => std::fs::read_to_string(roster_path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };

    let entries = risk::assess_cohort(&roster, &readings);
    let summary = risk::summarize(&entries);

    println!("Cohort: {} subjects", summary.total());
    println!("  Critical: {}", summary.critical);
    println!("  Warning:  {}", summary.warning);
    println!("  Stable:   {}", summary.stable);
    println!("  No data:  {}", summary.no_data);

    if tier.is_some() || !search.is_empty() {
        let selected = risk::filter_cohort(&entries, tier.map(RiskAssessment::from), search);
        println!();
        for entry in &selected {
            println!("  {:<24} {}", entry.subject_id, entry.assessment);
        }
        if selected.is_empty() {
            println!("  (no matching subjects)");
        }
    }
    Ok(())
}

fn cmd_export(path: &Path, output: &Path, period: Option<Period>) -> Result<()> {
    let all = read_readings(path)?;
    let selected: Vec<&Reading> = match period {
        Some(period) => readings::within_period(&all, period, chrono::Utc::now()),
        None => {
            let mut sorted: Vec<&Reading> = all.iter().collect();
            sorted.sort_by_key(|r| r.timestamp);
            sorted
        }
    };

    let count = export_csv(selected, output)?;
    println!("✓ Exported {} readings", count);
    println!("  CSV: {}", output.display());
    Ok(())
}

fn cmd_session_status(store: &FileSessionStore) -> Result<()> {
    match store.load()? {
        Some(session) => {
            println!("Signed in as {} ({})", session.profile.email, session.role);
            println!("  Subject: {}", session.profile.subject_id);
            if let Some(username) = &session.profile.username {
                println!("  Username: {}", username);
            }
        }
        None => println!("No active session."),
    }
    Ok(())
}

fn cmd_session_clear(store: &mut FileSessionStore) -> Result<()> {
    store.clear()?;
    println!("✓ Session cleared");
    Ok(())
}

fn cmd_config_check(file: Option<&Path>) -> Result<()> {
    let config = match file {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let problems = config.validate();
    if problems.is_empty() {
        println!("✓ Configuration OK");
        return Ok(());
    }

    eprintln!("Configuration problems:");
    for problem in &problems {
        eprintln!("  - {}", problem);
    }
    Err(Error::Config(format!("{} problem(s) found", problems.len())))
}
