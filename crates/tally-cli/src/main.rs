//! Tally CLI - offline-first record capture from the command line
//!
//! Mutations always land in the local store first and are replayed against
//! the remote service when one is configured.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::resolve_db_path;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), error::CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tally=info".parse().expect("static directive parses")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Add { collection, fields } => {
            commands::add::run_add(&collection, &fields, &db_path).await?;
        }
        Commands::List {
            collection,
            limit,
            json,
            local,
        } => {
            commands::list::run_list(&collection, limit, json, local, &db_path).await?;
        }
        Commands::Show { id, json } => commands::show::run_show(&id, json, &db_path).await?,
        Commands::Edit { id, fields } => commands::edit::run_edit(&id, &fields, &db_path).await?,
        Commands::Delete { id } => commands::delete::run_delete(&id, &db_path).await?,
        Commands::Push => commands::push::run_push(&db_path).await?,
        Commands::Status => commands::status::run_status(&db_path).await?,
        Commands::Migrate => commands::migrate::run_migrate(&db_path).await?,
        Commands::Completions { shell, output } => {
            commands::completions::run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
