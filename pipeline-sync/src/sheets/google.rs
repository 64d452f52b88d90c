//! Google Sheets reader over the v4 values API
//!
//! Full reads use `values.get` on `'Tab'!A<first>:<last column>`. Row subsets
//! use a single `values:batchGet` with one range per row (chunked so the URL
//! stays within the service's limits).

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{RawCell, RawRow, SheetSource, SourceError, SourceErrorKind, normalize_row_request};
use crate::config::SheetsConfig;
use crate::sync::models::SourceDescriptor;

/// Maximum ranges per batchGet request
const BATCH_GET_CHUNK: usize = 100;

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

pub struct GoogleSheetsReader {
    http: reqwest::Client,
    api_base: String,
    last_column: String,
    access_token: Option<String>,
    token_env: String,
}

impl GoogleSheetsReader {
    pub fn new(config: &SheetsConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let access_token = std::env::var(&config.access_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if access_token.is_none() {
            log::debug!(
                "No Google Sheets token in ${}, Google sources will fail to read",
                config.access_token_env
            );
        }

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            last_column: config.last_column.clone(),
            access_token,
            token_env: config.access_token_env.clone(),
        })
    }

    fn a1_range(&self, sheet: &str, from_row: u32, to_row: Option<u32>) -> String {
        let quoted = sheet.replace('\'', "''");
        match to_row {
            Some(to) => format!("'{}'!A{}:{}{}", quoted, from_row, self.last_column, to),
            None => format!("'{}'!A{}:{}", quoted, from_row, self.last_column),
        }
    }

    /// One batchGet URL per chunk of `BATCH_GET_CHUNK` rows, a single-row
    /// range per requested row
    fn batch_get_urls(&self, source: &SourceDescriptor, rows: &[u32]) -> Vec<String> {
        rows.chunks(BATCH_GET_CHUNK)
            .map(|chunk| {
                let ranges = chunk
                    .iter()
                    .map(|row| {
                        format!(
                            "ranges={}",
                            urlencoding::encode(&self.a1_range(&source.sheet_name, *row, Some(*row)))
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("&");
                format!(
                    "{}/spreadsheets/{}/values:batchGet?{}&majorDimension=ROWS&valueRenderOption=UNFORMATTED_VALUE&dateTimeRenderOption=SERIAL_NUMBER",
                    self.api_base,
                    urlencoding::encode(&source.spreadsheet_id),
                    ranges,
                )
            })
            .collect()
    }

    fn token(&self) -> Result<&str, SourceError> {
        self.access_token.as_deref().ok_or_else(|| {
            SourceError::new(
                SourceErrorKind::PermissionDenied,
                format!("no access token configured (set ${})", self.token_env),
            )
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let token = self.token()?;
        log::debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        response.json::<T>().await.map_err(|e| {
            SourceError::new(
                SourceErrorKind::Malformed,
                format!("unexpected response body: {}", e),
            )
        })
    }
}

#[async_trait]
impl SheetSource for GoogleSheetsReader {
    async fn fetch_range(
        &self,
        source: &SourceDescriptor,
        first_row: u32,
    ) -> Result<Vec<RawRow>, SourceError> {
        let range = self.a1_range(&source.sheet_name, first_row, None);
        let url = format!(
            "{}/spreadsheets/{}/values/{}?majorDimension=ROWS&valueRenderOption=UNFORMATTED_VALUE&dateTimeRenderOption=SERIAL_NUMBER",
            self.api_base,
            urlencoding::encode(&source.spreadsheet_id),
            urlencoding::encode(&range),
        );

        let body: ValueRange = self.get_json(&url).await?;
        let rows: Vec<RawRow> = body
            .values
            .iter()
            .enumerate()
            .map(|(idx, cells)| {
                RawRow::new(
                    first_row + idx as u32,
                    cells.iter().map(RawCell::from_json).collect(),
                )
            })
            .collect();

        log::info!(
            "Read {} rows from Google sheet {} / '{}'",
            rows.len(),
            source.spreadsheet_id,
            source.sheet_name
        );
        Ok(rows)
    }

    async fn fetch_rows(
        &self,
        source: &SourceDescriptor,
        rows: &[u32],
    ) -> Result<Vec<RawRow>, SourceError> {
        let rows = normalize_row_request(rows, 1);
        let mut result = Vec::with_capacity(rows.len());

        let urls = self.batch_get_urls(source, &rows);
        for (chunk, url) in rows.chunks(BATCH_GET_CHUNK).zip(&urls) {
            let body: BatchGetResponse = self.get_json(url).await?;
            result.extend(rows_from_batch(chunk, body)?);
        }

        log::info!(
            "Read {} selected rows from Google sheet {} / '{}'",
            result.len(),
            source.spreadsheet_id,
            source.sheet_name
        );
        Ok(result)
    }
}

/// Pair each requested row with its range in a batchGet response.
/// valueRanges come back in request order.
fn rows_from_batch(chunk: &[u32], body: BatchGetResponse) -> Result<Vec<RawRow>, SourceError> {
    if body.value_ranges.len() != chunk.len() {
        return Err(SourceError::new(
            SourceErrorKind::Malformed,
            format!(
                "requested {} ranges but received {}",
                chunk.len(),
                body.value_ranges.len()
            ),
        ));
    }

    Ok(chunk
        .iter()
        .zip(body.value_ranges)
        .map(|(row_number, range)| {
            let cells = range
                .values
                .first()
                .map(|cells| cells.iter().map(RawCell::from_json).collect())
                .unwrap_or_default();
            RawRow::new(*row_number, cells)
        })
        .collect())
}

fn classify_transport_error(err: reqwest::Error) -> SourceError {
    let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
        SourceErrorKind::Network
    } else {
        SourceErrorKind::Other
    };
    SourceError::new(kind, err.to_string())
}

/// Map an error response to a classified failure. A missing tab is reported
/// by the service as a 400 "Unable to parse range".
fn classify_status(status: u16, body: &str) -> SourceError {
    let kind = if status == 400 && body.contains("Unable to parse range") {
        SourceErrorKind::NotFound
    } else {
        SourceErrorKind::from_status(status)
    };

    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());

    SourceError::new(kind, format!("HTTP {}: {}", status, detail))
}
