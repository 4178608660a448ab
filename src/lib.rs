use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use itertools::Itertools;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

/// Records sent per insert request.
pub const BATCH_SIZE: usize = 500;

pub const DEFAULT_TABLE: &str = "patrimonio_suap";

/// Characters of a failed response body kept in log and error messages.
const ERROR_BODY_LIMIT: usize = 200;

/// CSV header, in the same order as the fields of [`Record`].
pub const FIELDS: [&str; 7] = [
    "numero",
    "descricao",
    "responsavel",
    "campus",
    "numero_serie",
    "sala",
    "estado_conservacao",
];

/// Sheet column indices. Column 0 is not used.
mod cols {
    pub const NUMERO: u32 = 1;
    pub const DESCRICAO: u32 = 2;
    pub const RESPONSAVEL: u32 = 3;
    pub const CAMPUS: u32 = 4;
    pub const NUMERO_SERIE: u32 = 5;
    pub const SALA: u32 = 6;
    pub const ESTADO_CONSERVACAO: u32 = 7;
}

/// One asset row of the report, shaped like a `patrimonio_suap` row.
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub numero: String,
    pub descricao: Option<String>,
    pub responsavel: Option<String>,
    pub campus: Option<String>,
    pub numero_serie: Option<String>,
    pub sala: Option<String>,
    pub estado_conservacao: Option<String>,
}

pub fn parse_records(path: &Path) -> Result<Vec<Record>> {
    debug!("Opening {:?}", path);
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open spreadsheet {:?}", path))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .with_context(|| format!("Spreadsheet {:?} has no sheets", path))?
        .clone();
    debug!("Reading sheet {:?}", sheet_name);

    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("Failed to read sheet {:?}", sheet_name))?;

    let records = records_from_range(&range);
    info!("Read {} records", records.len());

    Ok(records)
}

/// Extracts the records of a sheet, skipping the header row and every row
/// without a usable `numero`.
///
/// Cells are addressed by absolute sheet position, so a blank column 0 or
/// leading blank rows do not shift the layout.
pub fn records_from_range(range: &Range<Data>) -> Vec<Record> {
    let (Some((first_row, _)), Some((last_row, _))) = (range.start(), range.end()) else {
        return Vec::new();
    };

    (first_row.max(1)..=last_row)
        .filter_map(|row| {
            let cell = |col| cell_string(range.get_value((row, col)));
            let record = record_from_cells(cell);
            if record.is_none() {
                debug!("Skipping row {} without numero", row + 1);
            }
            record
        })
        .collect_vec()
}

fn record_from_cells(cell: impl Fn(u32) -> String) -> Option<Record> {
    let raw = cell(cols::NUMERO);
    if is_zero_or_empty(&raw) {
        return None;
    }
    let numero = normalize_numero(&raw);

    let optional = |col| Some(cell(col)).filter(|s| !s.is_empty());
    Some(Record {
        numero,
        descricao: optional(cols::DESCRICAO),
        responsavel: optional(cols::RESPONSAVEL),
        campus: optional(cols::CAMPUS),
        numero_serie: optional(cols::NUMERO_SERIE),
        sala: optional(cols::SALA),
        estado_conservacao: optional(cols::ESTADO_CONSERVACAO),
    })
}

fn is_zero_or_empty(numero: &str) -> bool {
    matches!(numero, "" | "0" | "0.0")
}

/// Trimmed text of a cell. Whole floats lose their fractional part.
fn cell_string(cell: Option<&Data>) -> String {
    let text = match cell {
        None | Some(Data::Empty) | Some(Data::Error(_)) => String::new(),
        Some(Data::String(s)) => s.clone(),
        Some(Data::Int(i)) => i.to_string(),
        Some(Data::Float(f)) if f.is_finite() && f.fract() == 0.0 => format!("{:.0}", f),
        Some(Data::Float(f)) => f.to_string(),
        Some(Data::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    };
    text.trim().to_string()
}

/// Turns a numeric identifier such as `608958.0` into `608958`.
///
/// Anything that does not parse as a finite float within `i64` range is
/// returned trimmed but otherwise untouched.
pub fn normalize_numero(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value.abs() < i64::MAX as f64 => {
            (value.trunc() as i64).to_string()
        }
        _ => trimmed.to_string(),
    }
}

pub fn write_csv<W: Write>(records: &[Record], writer: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(FIELDS)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    debug!("Wrote {} records as CSV", records.len());

    Ok(())
}

/// Location and public API key of the Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseProject {
    pub base_url: String,
    pub api_key: String,
}

impl SupabaseProject {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            api_key: api_key.into(),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/auth/v1/token", self.base_url)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }
}

#[derive(Debug, Serialize, Clone)]
struct LoginArgs<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Logs in with email and password and returns the bearer token.
pub async fn login(
    client: &reqwest::Client,
    project: &SupabaseProject,
    email: &str,
    password: &str,
) -> Result<String> {
    let res = client
        .post(project.token_url())
        .query(&[("grant_type", "password")])
        .header("apikey", &project.api_key)
        .json(&LoginArgs { email, password })
        .send()
        .await
        .context("Login request failed")?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        bail!("Login failed: {} - {}", status.as_u16(), truncate_body(&body));
    }

    let token = res
        .json::<TokenResponse>()
        .await
        .context("Login response did not contain an access token")?
        .access_token;
    debug!("Obtained access token for {}", email);

    Ok(token)
}

/// Outcome of an upload. A batch counts entirely as uploaded or failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub failed: usize,
    pub batches: usize,
}

pub fn batch_count(records: usize, batch_size: usize) -> usize {
    records.div_ceil(batch_size)
}

/// Inserts the records into `table`, one request per batch of `batch_size`.
///
/// A failing batch is logged and counted; the remaining batches are still
/// sent. Rows the server already holds are skipped by the server.
pub async fn upload(
    client: &reqwest::Client,
    project: &SupabaseProject,
    token: &str,
    table: &str,
    records: &[Record],
    batch_size: usize,
) -> Result<UploadSummary> {
    if batch_size == 0 {
        bail!("Batch size must be at least 1");
    }

    let total_batches = batch_count(records.len(), batch_size);
    info!(
        "Uploading {} records to {} in {} batches",
        records.len(),
        table,
        total_batches
    );

    let mut summary = UploadSummary::default();
    for (i, batch) in records.chunks(batch_size).enumerate() {
        info!("Batch {}/{} ({} records)...", i + 1, total_batches, batch.len());
        match upload_batch(client, project, token, table, batch).await {
            Ok(()) => summary.uploaded += batch.len(),
            Err(err) => {
                error!("Batch {} failed: {:#}", i + 1, err);
                summary.failed += batch.len();
            }
        }
        summary.batches += 1;
    }

    Ok(summary)
}

async fn upload_batch(
    client: &reqwest::Client,
    project: &SupabaseProject,
    token: &str,
    table: &str,
    batch: &[Record],
) -> Result<()> {
    debug!(
        "Posting {} records, first numero {:?}",
        batch.len(),
        batch.first().map(|r| r.numero.as_str())
    );
    let res = client
        .post(project.table_url(table))
        .header("apikey", &project.api_key)
        .bearer_auth(token)
        .header("Prefer", "resolution=ignore-duplicates")
        .json(batch)
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        bail!("{} - {}", status.as_u16(), truncate_body(&body));
    }

    Ok(())
}

fn truncate_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}
