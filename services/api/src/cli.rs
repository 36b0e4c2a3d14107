use crate::demo::{run_demo, run_import_check, run_license_check, DemoArgs, ImportArgs, LicenseArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use gunsmith_directory::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Gunsmith Directory",
    about = "Run the listing ownership service or exercise its workflows from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Check a federal firearms license number against the structural format
    License(LicenseArgs),
    /// Dry-run a listing CSV import and print what would be created
    Import(ImportArgs),
    /// Walk one listing through claim, verification, payment and expiry
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Listing CSV (`name,region`) to load into the store before serving
    #[arg(long)]
    pub(crate) seed_csv: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::License(args) => run_license_check(args),
        Command::Import(args) => run_import_check(args),
        Command::Demo(args) => run_demo(args),
    }
}
