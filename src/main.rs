use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use survey_pivot::config::Config;
use survey_pivot::db::SslMode;
use survey_pivot::export::{preview, OutputFormat};
use survey_pivot::survey::ExtractionDriver;
use tracing::{error, info, Level};

/// Pivot survey answers into one row per user and survey
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to <config dir>/survey-pivot/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    database: Option<String>,

    #[arg(short = 'U', long = "user")]
    username: Option<String>,

    #[arg(long, value_enum)]
    ssl_mode: Option<SslMode>,

    /// Never prompt for a password; use PGPASSWORD or none
    #[arg(short = 'w', long)]
    no_password: bool,

    /// Where the last seen survey structure is kept
    #[arg(long)]
    structure_cache: Option<PathBuf>,

    /// Where the generated pivot query is kept
    #[arg(long)]
    query_cache: Option<PathBuf>,

    /// Export file, overwritten on every run
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Regenerate the pivot query even if the structure is unchanged
    #[arg(long)]
    refresh: bool,

    /// Rows to show from each end of the result (0 disables the preview)
    #[arg(long, default_value_t = 10)]
    preview: usize,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(database) = &self.database {
            config.connection.database = database.clone();
        }
        if let Some(username) = &self.username {
            config.connection.username = username.clone();
        }
        if let Some(ssl_mode) = self.ssl_mode {
            config.connection.ssl_mode = ssl_mode;
        }
        if let Some(path) = &self.structure_cache {
            config.paths.structure_cache = path.clone();
        }
        if let Some(path) = &self.query_cache {
            config.paths.query_cache = path.clone();
        }
        if let Some(path) = &self.output {
            config.paths.output = path.clone();
        }
        if let Some(format) = self.format {
            config.paths.format = format;
        }
    }

    fn log_level(&self) -> Level {
        match (self.quiet, self.verbose) {
            (true, _) => Level::WARN,
            (false, 0) => Level::INFO,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    // Resolve password: PGPASSWORD env var, then interactive prompt
    if config.connection.password.is_empty() {
        if let Ok(pw) = std::env::var("PGPASSWORD") {
            config.connection.password = pw;
        } else if !cli.no_password {
            let prompt = format!("Password for {}: ", config.connection.display_string());
            config.connection.password = rpassword::read_password_from_tty(Some(&prompt))?;
        }
    }

    let driver = ExtractionDriver::new(&config.paths, &config.schema).force_refresh(cli.refresh);
    match driver.run(&config.connection).await {
        Ok(report) => {
            info!(
                "Pivot query {}, {} rows exported to {}",
                report.action,
                report.table.row_count,
                report.output.display()
            );
            if cli.preview > 0 && !cli.quiet {
                println!("{}", preview(&report.table, cli.preview));
            }
            Ok(())
        }
        Err(err) => {
            error!("Run aborted ({} error)", err.kind());
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    }
}
