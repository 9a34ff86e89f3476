mod agent;
mod cli;
mod cmd;
mod config;
mod errors;
mod git;
mod keybindings;
mod lifecycle;
mod logger;
mod manager;
mod multiplexer;
mod notify;
mod recovery;
mod shell;
mod store;
mod vcs;
mod watcher;

use anyhow::Result;
use tracing::error;

fn main() -> Result<()> {
    match cli::run() {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(error = ?err, "taw failed");
            Err(err)
        }
    }
}
