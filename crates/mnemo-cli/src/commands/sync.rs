use std::io::{self, BufRead, IsTerminal, Write};

use mnemo_core::NoteRepository;

use crate::error::CliError;

pub async fn run_sync(repository: &NoteRepository) -> Result<(), CliError> {
    let report = repository.synchronize().await?;
    if !report.is_success() {
        return Err(CliError::SyncFailed(report.errors.len()));
    }

    println!("Sync completed: {report}");
    Ok(())
}

pub async fn run_full_resync(repository: &NoteRepository, confirmed: bool) -> Result<(), CliError> {
    if !confirmed && !confirm("Delete every local note and download them again? [y/N] ")? {
        return Err(CliError::Cancelled);
    }

    repository.full_resync().await?;
    println!("Local notes cleared; run `mnemo sync` to download them again");
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool, CliError> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }

    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
