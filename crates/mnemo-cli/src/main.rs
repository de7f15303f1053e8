//! mnemo CLI - local notes kept in sync from the terminal
//!
//! Every invocation opens the note repository of the selected account, runs
//! one command and shuts the repository down gracefully.

mod cli;
mod commands;
mod error;
mod feedback;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use mnemo_core::NoteRepository;

use crate::cli::{Cli, Commands};
use crate::commands::account::run_account;
use crate::commands::add::run_add;
use crate::commands::common::{close_repository, Context};
use crate::commands::delete::{run_delete, run_resolve, run_restore};
use crate::commands::edit::{run_edit, EditArgs};
use crate::commands::list::{run_list, run_show};
use crate::commands::sync::{run_full_resync, run_sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mnemo=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = Context::resolve(cli.config, cli.db_path, cli.account)?;

    let command = match cli.command {
        Some(Commands::Account(command)) => return run_account(&context, command),
        Some(command) => command,
        None if cli.note.is_empty() => {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
        // Quick capture mode: mnemo "my thought"
        None => Commands::Add {
            title: None,
            tags: Vec::new(),
            content: cli.note,
        },
    };

    let repository = context.open_repository()?;
    let result = run_command(&context, &repository, command).await;
    let closed = close_repository(&repository).await;
    result.and(closed)
}

async fn run_command(
    context: &Context,
    repository: &NoteRepository,
    command: Commands,
) -> Result<(), CliError> {
    match command {
        Commands::Add {
            title,
            tags,
            content,
        } => run_add(repository, title.as_deref(), &tags, &content).await,
        Commands::List {
            limit,
            tag,
            deleted,
            json,
        } => run_list(repository, limit, tag.as_deref(), deleted, json).await,
        Commands::Show { id, json } => run_show(repository, &id, json).await,
        Commands::Edit {
            id,
            title,
            text,
            add_tags,
            remove_tags,
        } => {
            let args = EditArgs {
                title,
                text,
                add_tags,
                remove_tags,
            };
            run_edit(repository, &id, args).await
        }
        Commands::Delete { id, permanent } => run_delete(repository, &id, permanent).await,
        Commands::Restore { id } => run_restore(repository, &id).await,
        Commands::Resolve { id } => run_resolve(repository, &id).await,
        Commands::Sync => run_sync(repository).await,
        Commands::FullResync { yes } => run_full_resync(repository, yes).await,
        Commands::Account(command) => run_account(context, command),
    }
}
