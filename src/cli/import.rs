use anyhow::Result;
use clap::Args;
use clap_stdin::MaybeStdin;
use log::{info, warn};
use patrimoniosync::{login, parse_records, upload, SupabaseProject, BATCH_SIZE, DEFAULT_TABLE};
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Debug, Args, Clone)]
pub struct ImportArgs {
    /// Asset report spreadsheet (.xls)
    file: PathBuf,

    supabase_email: String,
    /// Password, or `-` to read it from stdin
    supabase_password: MaybeStdin<String>,

    /// Project URL, e.g. https://<ref>.supabase.co
    #[arg(long, env = "SUPABASE_URL")]
    url: String,

    /// Public (anon) API key of the project
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value = DEFAULT_TABLE)]
    table: String,

    #[arg(long, default_value_t = NonZeroUsize::new(BATCH_SIZE).unwrap_or(NonZeroUsize::MIN))]
    batch_size: NonZeroUsize,
}

pub(crate) async fn handle(args: ImportArgs) -> Result<()> {
    info!("Reading {:?}", args.file);
    let records = parse_records(&args.file)?;
    info!("Found {} records", records.len());

    let client = reqwest::Client::new();
    let project = SupabaseProject::new(args.url, args.api_key);

    info!("Logging in as {}", args.supabase_email);
    let token = login(
        &client,
        &project,
        &args.supabase_email,
        &args.supabase_password.to_string(),
    )
    .await?;
    info!("Login OK");

    let summary = upload(
        &client,
        &project,
        &token,
        &args.table,
        &records,
        args.batch_size.get(),
    )
    .await?;

    info!("Done! Uploaded: {}, Failed: {}", summary.uploaded, summary.failed);
    if summary.failed > 0 {
        warn!(
            "{} of {} records were not uploaded, see the errors above",
            summary.failed,
            records.len()
        );
    }

    Ok(())
}
