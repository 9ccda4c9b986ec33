use anyhow::Result;
use clap::Args;
use offsite_core::{Error, FilenamePrefix, ParityManager, ParityReport};

use super::Context;

#[derive(Args)]
pub struct ParityCommand {
    #[arg(long, help = "Prefix of the filenames")]
    prefix: String,

    #[arg(long, help = "Create the parity files (default)")]
    create: bool,

    #[arg(long, help = "Verify existing parity files")]
    verify: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParityMode {
    Create,
    Verify,
}

impl ParityCommand {
    fn mode(&self) -> Result<ParityMode, Error> {
        match (self.create, self.verify) {
            (true, true) => Err(Error::Usage(
                "Cannot pass in both --create and --verify!".to_string(),
            )),
            (_, true) => Ok(ParityMode::Verify),
            _ => Ok(ParityMode::Create),
        }
    }

    pub async fn run(&self, ctx: &Context) -> Result<()> {
        let mode = self.mode()?;
        let prefix = FilenamePrefix::raw(&self.prefix);
        let manager = ParityManager::new(&ctx.workdir, ctx.runner.clone());

        let report = match mode {
            ParityMode::Create => manager.create(&prefix).await?,
            ParityMode::Verify => manager.verify(&prefix).await?,
        };
        print_report(mode, &report);
        Ok(())
    }
}

fn print_report(mode: ParityMode, report: &ParityReport) {
    match mode {
        ParityMode::Create => println!(
            "Created {} parity files, {} already present",
            report.processed.len(),
            report.skipped.len()
        ),
        ParityMode::Verify => println!("Verified {} parity files", report.processed.len()),
    }
}
