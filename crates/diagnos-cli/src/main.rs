//! diagnos CLI: drive interview sessions and review exam analytics.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "diagnos",
    version,
    about = "Diagnostic interview coverage and exam item analytics"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a session from a newline-delimited extraction event log
    Replay {
        /// Path to the .jsonl event log
        #[arg(long)]
        events: PathBuf,

        /// Student the session belongs to
        #[arg(long, default_value = "student")]
        student: String,

        /// Subject area of the interview
        #[arg(long, default_value = "general")]
        subject: String,

        /// Write the resulting session JSON here
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show pending diagnostic tasks for a session
    Coverage {
        /// Session JSON file
        #[arg(long)]
        session: PathBuf,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the next interview objective for a session
    Objective {
        /// Session JSON file
        #[arg(long)]
        session: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run calibration, fairness and curriculum checks over a store snapshot
    Review {
        /// Store snapshot JSON
        #[arg(long)]
        snapshot: PathBuf,

        /// Exams to review (default: every exam in the snapshot)
        #[arg(long = "exam")]
        exams: Vec<String>,

        /// Output directory (default: from config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Output format: json, markdown, text, all
        #[arg(long, default_value = "json")]
        format: String,

        /// Max concurrent exam reviews (default: from config)
        #[arg(long)]
        parallelism: Option<usize>,

        /// Exit code 1 if any CRITICAL alert was raised
        #[arg(long)]
        fail_on_critical: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and an example event log
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("diagnos=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            events,
            student,
            subject,
            output,
        } => commands::replay::execute(events, student, subject, output),
        Commands::Coverage {
            session,
            format,
            config,
        } => commands::coverage::execute(session, format, config),
        Commands::Objective { session, config } => commands::objective::execute(session, config),
        Commands::Review {
            snapshot,
            exams,
            output,
            format,
            parallelism,
            fail_on_critical,
            config,
        } => {
            commands::review::execute(
                snapshot,
                exams,
                output,
                format,
                parallelism,
                fail_on_critical,
                config,
            )
            .await
        }
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
