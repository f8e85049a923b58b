//! Render report tables as `.xlsx` documents.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook};

use crate::error::ExportError;
use crate::recon::ExportTable;
use crate::recon::report::EXPORT_HEADERS;

/// An export ready to hand to a channel.
#[derive(Debug, Clone)]
pub struct RenderedExport {
    pub file_name: String,
    pub caption: String,
    pub bytes: Vec<u8>,
}

/// Build the workbook for one table: a header row, then `(No., Account)` rows.
pub fn render_xlsx(table: &ExportTable) -> Result<RenderedExport, ExportError> {
    let render_error = |e: rust_xlsxwriter::XlsxError| ExportError::Render {
        file_name: table.file_name.clone(),
        reason: e.to_string(),
    };

    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook
        .add_worksheet()
        .set_name(table.kind.sheet_name())
        .map_err(render_error)?;

    for (col, title) in EXPORT_HEADERS.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, *title, &header)
            .map_err(render_error)?;
    }

    let mut widest = EXPORT_HEADERS[1].len();
    for (i, (seq, id)) in table.rows.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_number(row, 0, *seq as f64).map_err(render_error)?;
        sheet.write_string(row, 1, id).map_err(render_error)?;
        widest = widest.max(id.len());
    }

    sheet.set_column_width(0, 8).map_err(render_error)?;
    sheet
        .set_column_width(1, (widest + 2).min(80) as f64)
        .map_err(render_error)?;
    sheet.set_freeze_panes(1, 0).map_err(render_error)?;

    let bytes = workbook.save_to_buffer().map_err(render_error)?;

    Ok(RenderedExport {
        file_name: table.file_name.clone(),
        caption: table.label.clone(),
        bytes,
    })
}

/// Write a rendered export under `dir`, creating it if needed.
pub async fn write_to_dir(export: &RenderedExport, dir: &Path) -> Result<PathBuf, ExportError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&export.file_name);
    tokio::fs::write(&path, &export.bytes).await?;
    Ok(path)
}
