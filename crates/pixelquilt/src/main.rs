mod app;
mod camera;
mod cli;
mod paths;
mod run;

use anyhow::Result;

use crate::cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Render(args)) => run::render(&cli.run, args),
        None => run::interactive(cli.run),
    }
}
