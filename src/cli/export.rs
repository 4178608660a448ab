use anyhow::{Context, Result};
use clap::Args;
use log::info;
use patrimoniosync::{parse_records, write_csv};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    /// Asset report spreadsheet (.xls)
    file: PathBuf,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub(crate) fn handle(args: ExportArgs) -> Result<()> {
    info!("Reading {:?}", args.file);
    let records = parse_records(&args.file)?;

    match &args.output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
            write_csv(&records, BufWriter::new(file))?;
            info!("Wrote {} records to {:?}", records.len(), path);
        }
        None => write_csv(&records, io::stdout().lock())?,
    }

    Ok(())
}
