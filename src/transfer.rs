//! Spreadsheet import and download
//!
//! Import uploads a local `.xlsx`/`.xls` workbook. Export and the import
//! template are saved under a target directory with the file names the web
//! front-end offers for download.

use crate::api::ApiClient;
use crate::error::{Result, ValidationError};
use crate::models::ImportOutcome;
use crate::validation::{validate_import_file, validate_import_name};
use chrono::{Local, NaiveDate};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of the import template download
pub const TEMPLATE_FILE_NAME: &str = "equipment_template.xlsx";

/// File name of an export made on `date`
///
/// # Examples
/// ```
/// use chrono::NaiveDate;
/// use equipment_desk::transfer::export_file_name;
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
/// assert_eq!(export_file_name(date), "equipment_export_2024-03-09.xlsx");
/// ```
pub fn export_file_name(date: NaiveDate) -> String {
    format!("equipment_export_{}.xlsx", date.format("%Y-%m-%d"))
}

#[derive(Clone)]
pub struct SpreadsheetTransfer {
    api: ApiClient,
}

impl SpreadsheetTransfer {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Upload the workbook at `path`.
    ///
    /// # Arguments
    /// * `path` - Local workbook to import
    /// * `column_map` - Optional mapping from equipment field to sheet header
    ///
    /// # Returns
    /// * `Result<ImportOutcome>` - The server's summary message
    ///
    /// # Errors
    /// The file is checked before it is sent: a missing name, an unknown
    /// extension or an empty file is a `ValidationError`. A rejected import
    /// carries every row error reported by the server, one per line.
    pub async fn import_path(
        &self,
        path: &Path,
        column_map: Option<&BTreeMap<String, String>>,
    ) -> Result<ImportOutcome> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or(ValidationError::NoFile)?
            .to_string();
        validate_import_name(&file_name)?;

        let contents = tokio::fs::read(path).await?;
        self.import_bytes(&file_name, contents, column_map).await
    }

    /// Upload workbook bytes already in memory.
    pub async fn import_bytes(
        &self,
        file_name: &str,
        contents: Vec<u8>,
        column_map: Option<&BTreeMap<String, String>>,
    ) -> Result<ImportOutcome> {
        validate_import_file(file_name, &contents)?;
        log::info!("Importing {} ({} bytes)", file_name, contents.len());
        let outcome = self.api.import_file(file_name, contents, column_map).await?;
        log::info!("Import finished: {}", outcome.message);
        Ok(outcome)
    }

    /// Save the current equipment table into `dir`; returns the file path.
    pub async fn export_to(&self, dir: &Path) -> Result<PathBuf> {
        let bytes = self.api.export().await?;
        let target = dir.join(export_file_name(Local::now().date_naive()));
        save(&target, &bytes).await?;
        Ok(target)
    }

    /// Save the empty import template into `dir`; returns the file path.
    pub async fn template_to(&self, dir: &Path) -> Result<PathBuf> {
        let bytes = self.api.download_template().await?;
        let target = dir.join(TEMPLATE_FILE_NAME);
        save(&target, &bytes).await?;
        Ok(target)
    }
}

async fn save(target: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, bytes).await?;
    log::info!("Saved {} ({} bytes)", target.display(), bytes.len());
    Ok(())
}
