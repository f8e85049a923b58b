//! Inbound payload decoding.
//!
//! A payload is either typed text or an uploaded file. Files are decoded to
//! text fragments by declared type:
//! - `.txt` / `.csv` / `text/*` → the whole body as one fragment
//! - `.xlsx` / `.xlsm` / `.xls` / `.ods` → one fragment per non-empty cell of
//!   the account column of the first worksheet, below its header row
//! - `.docx` → paragraph text joined by line breaks, one fragment
//!
//! Each fragment then goes through the extractor on its own, so a comma in
//! one spreadsheet cell never changes how another cell is split.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use calamine::{Data, Ods, Reader, Xls, Xlsx};

use crate::error::IngestError;
use crate::recon::extract::extract_fragments;
use crate::recon::report::EXPORT_HEADERS;

/// Telegram Bot API download ceiling; larger uploads are rejected up front.
pub const MAX_FILE_BYTES: u64 = 20 * 1024 * 1024;

/// One submission as received from a channel.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    File(FileUpload),
}

/// An uploaded document.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Decoders this crate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PlainText,
    Xlsx,
    Xls,
    Ods,
    Docx,
}

impl FileKind {
    /// Resolve the decoder from the file extension, falling back to MIME type.
    pub fn detect(file_name: &str, mime_type: Option<&str>) -> Option<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("txt" | "csv") => return Some(Self::PlainText),
            Some("xlsx" | "xlsm") => return Some(Self::Xlsx),
            Some("xls") => return Some(Self::Xls),
            Some("ods") => return Some(Self::Ods),
            Some("docx") => return Some(Self::Docx),
            _ => {}
        }

        let mime = mime_type?.to_ascii_lowercase();
        if mime.starts_with("text/") {
            Some(Self::PlainText)
        } else if mime.contains("spreadsheetml") {
            Some(Self::Xlsx)
        } else if mime.contains("vnd.ms-excel") {
            Some(Self::Xls)
        } else if mime.contains("opendocument.spreadsheet") {
            Some(Self::Ods)
        } else if mime.contains("wordprocessingml") {
            Some(Self::Docx)
        } else {
            None
        }
    }
}

/// Turn a payload into the ordered, deduplicated identifiers it contains.
pub fn identifiers(payload: &Payload) -> Result<Vec<String>, IngestError> {
    let fragments = fragments(payload)?;
    let ids = extract_fragments(fragments.iter().map(String::as_str));
    if ids.is_empty() {
        return Err(IngestError::EmptyInput);
    }
    Ok(ids)
}

/// Decode a payload into text fragments.
pub fn fragments(payload: &Payload) -> Result<Vec<String>, IngestError> {
    match payload {
        Payload::Text(text) => {
            if text.trim().is_empty() {
                Err(IngestError::EmptyInput)
            } else {
                Ok(vec![text.clone()])
            }
        }
        Payload::File(file) => decode_file(file),
    }
}

fn decode_file(file: &FileUpload) -> Result<Vec<String>, IngestError> {
    let kind = FileKind::detect(&file.file_name, file.mime_type.as_deref()).ok_or_else(|| {
        IngestError::UnsupportedFormat {
            file_name: file.file_name.clone(),
        }
    })?;

    let decode_error = |reason: String| IngestError::Decode {
        file_name: file.file_name.clone(),
        reason,
    };

    let fragments = match kind {
        FileKind::PlainText => vec![decode_text(&file.bytes)],
        FileKind::Xlsx => {
            let workbook: Xlsx<_> =
                Xlsx::new(Cursor::new(file.bytes.as_slice())).map_err(|e| decode_error(e.to_string()))?;
            first_sheet_cells(workbook).map_err(decode_error)?
        }
        FileKind::Xls => {
            let workbook: Xls<_> =
                Xls::new(Cursor::new(file.bytes.as_slice())).map_err(|e| decode_error(e.to_string()))?;
            first_sheet_cells(workbook).map_err(decode_error)?
        }
        FileKind::Ods => {
            let workbook: Ods<_> =
                Ods::new(Cursor::new(file.bytes.as_slice())).map_err(|e| decode_error(e.to_string()))?;
            first_sheet_cells(workbook).map_err(decode_error)?
        }
        FileKind::Docx => vec![docx_text(&file.bytes).map_err(decode_error)?],
    };

    tracing::debug!(
        file_name = %file.file_name,
        kind = ?kind,
        fragments = fragments.len(),
        "Decoded upload"
    );

    if fragments.iter().all(|f| f.trim().is_empty()) {
        return Err(IngestError::EmptyInput);
    }
    Ok(fragments)
}

/// UTF-8 with invalid sequences replaced and a leading BOM removed.
fn decode_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_start_matches('\u{feff}').to_string()
}

/// Account cells of the first sheet: one column, header row dropped.
///
/// The column is the one headed like our own exports (`Account`), so a
/// returned export can be checked again; otherwise the first column.
fn first_sheet_cells<RS, R>(mut workbook: R) -> Result<Vec<String>, String>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| format!("failed to read first sheet: {e}"))?,
        None => return Err("workbook contains no sheets".to_string()),
    };

    let mut rows = range.rows();
    let column = rows
        .next()
        .and_then(|header| header.iter().position(is_account_header))
        .unwrap_or(0);

    Ok(rows
        .filter_map(|row| row.get(column))
        .filter_map(cell_text)
        .collect())
}

fn is_account_header(cell: &Data) -> bool {
    matches!(cell, Data::String(s) if s.trim().eq_ignore_ascii_case(EXPORT_HEADERS[1]))
}

fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.clone(),
        // Account numbers typed into a sheet come back as floats.
        Data::Float(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        Data::Float(n) => n.to_string(),
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => b.to_string().to_uppercase(),
        other => other.to_string(),
    };
    if text.trim().is_empty() { None } else { Some(text) }
}

/// Paragraph text of a `.docx` body, one paragraph per line.
fn docx_text(bytes: &[u8]) -> Result<String, String> {
    use quick_xml::Reader as XmlReader;
    use quick_xml::events::Event;

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a docx archive: {e}"))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| format!("missing word/document.xml: {e}"))?
        .read_to_string(&mut xml)
        .map_err(|e| format!("unreadable word/document.xml: {e}"))?;

    let mut reader = XmlReader::from_str(&xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => {
                current.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed document XML: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs.join("\n"))
}
