//! Multi-format text extraction.
//!
//! Turns one file into normalized UTF-8 text. The format is chosen from the
//! file extension; anything not listed in [`SUPPORTED_EXTENSIONS`] fails
//! with [`ExtractError::UnsupportedFormat`] rather than being skipped.
//!
//! | Extensions | Method |
//! |------------|--------|
//! | `.txt .md .mdx` | read as UTF-8 (lossy) |
//! | `.csv` | first 500 rows as a markdown table |
//! | `.json` | pretty-printed in a fenced block |
//! | `.jsonl` | first 500 lines, re-serialized |
//! | `.html .htm` | visible body text |
//! | `.pdf` | `pdf-extract` |
//! | `.docx .pptx .xlsx` | OOXML parts via `zip` + `quick-xml` |
//! | images | `tesseract` subprocess, only when OCR is enabled |
//!
//! Every extraction runs under a time budget so a pathological file cannot
//! stall its job. CPU-bound parsers run on the blocking pool; a timed-out
//! parser thread is abandoned, not interrupted.

use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Extensions the extractor accepts (lowercase, without the dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "txt", "md", "mdx", "csv", "json", "jsonl", "html", "htm", "pdf", "docx", "pptx", "xlsx",
    "png", "jpg", "jpeg", "tif", "tiff", "bmp", "gif", "webp",
];

/// Maximum rows rendered from a CSV file.
const CSV_MAX_ROWS: usize = 500;
/// Maximum lines read from a JSON Lines file.
const JSONL_MAX_LINES: usize = 500;
/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("image input requires OCR to be enabled")]
    OcrDisabled,
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("CSV extraction failed: {0}")]
    Csv(String),
    #[error("JSON extraction failed: {0}")]
    Json(String),
    #[error("HTML extraction failed: {0}")]
    Html(String),
    #[error("no extractable text")]
    Empty,
    #[error("extraction exceeded {0:?}")]
    Timeout(Duration),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Document format, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Csv,
    Json,
    JsonLines,
    Html,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Image,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" | "mdx" => Some(Format::Text),
            "csv" => Some(Format::Csv),
            "json" => Some(Format::Json),
            "jsonl" => Some(Format::JsonLines),
            "html" | "htm" => Some(Format::Html),
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            "pptx" => Some(Format::Pptx),
            "xlsx" => Some(Format::Xlsx),
            "png" | "jpg" | "jpeg" | "tif" | "tiff" | "bmp" | "gif" | "webp" => Some(Format::Image),
            _ => None,
        }
    }
}

/// Whether `path` has an extension the extractor handles.
pub fn is_supported(path: &Path) -> bool {
    Format::from_path(path).is_some()
}

/// Per-job extraction settings.
#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub ocr: bool,
    pub ocr_command: String,
    pub timeout: Duration,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            ocr: false,
            ocr_command: "tesseract".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Extracts and normalizes the text of one file within the time budget.
pub async fn extract_file(path: &Path, settings: &ExtractSettings) -> Result<String, ExtractError> {
    let format = Format::from_path(path).ok_or_else(|| {
        ExtractError::UnsupportedFormat(
            path.extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_else(|| "(no extension)".to_string()),
        )
    })?;

    let work = async {
        if format == Format::Image {
            if !settings.ocr {
                return Err(ExtractError::OcrDisabled);
            }
            return run_ocr(&settings.ocr_command, path).await;
        }
        let bytes = tokio::fs::read(path).await?;
        tokio::task::spawn_blocking(move || extract_bytes(format, &bytes))
            .await
            .map_err(|e| ExtractError::Io(std::io::Error::other(e)))?
    };

    let raw = tokio::time::timeout(settings.timeout, work)
        .await
        .map_err(|_| ExtractError::Timeout(settings.timeout))??;

    let text = normalize_text(&raw);
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

/// Extracts raw text from in-memory content of a known format.
pub fn extract_bytes(format: Format, bytes: &[u8]) -> Result<String, ExtractError> {
    match format {
        Format::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Format::Csv => extract_csv(bytes),
        Format::Json => extract_json(bytes),
        Format::JsonLines => Ok(extract_jsonl(bytes)),
        Format::Html => extract_html(bytes),
        Format::Pdf => extract_pdf(bytes),
        Format::Docx => extract_docx(bytes),
        Format::Pptx => extract_pptx(bytes),
        Format::Xlsx => extract_xlsx(bytes),
        Format::Image => Err(ExtractError::OcrDisabled),
    }
}

/// Collapses runs of spaces and tabs, drops carriage returns, squeezes blank
/// lines, and trims.
pub fn normalize_text(text: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static BLANKS: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"[ \t]+").expect("valid regex"));
    let blanks = BLANKS.get_or_init(|| Regex::new(r"\n(?: ?\n)+").expect("valid regex"));

    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = spaces.replace_all(&text, " ");
    let text = blanks.replace_all(&text, "\n\n");
    text.trim().to_string()
}

async fn run_ocr(command: &str, path: &Path) -> Result<String, ExtractError> {
    let output = tokio::process::Command::new(command)
        .arg(path)
        .arg("stdout")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ExtractError::Ocr(format!("failed to run {}: {}", command, e)))?;
    if !output.status.success() {
        return Err(ExtractError::Ocr(format!(
            "{} exited with {}: {}",
            command,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn extract_csv(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records().take(CSV_MAX_ROWS) {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        rows.push(record.iter().map(|f| f.trim().to_string()).collect());
    }

    let Some(header) = rows.first() else {
        return Ok(String::new());
    };
    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(format!("| {} |", header.join(" | ")));
    out.push(format!(
        "| {} |",
        header.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    ));
    for row in &rows[1..] {
        out.push(format!("| {} |", row.join(" | ")));
    }
    Ok(out.join("\n"))
}

fn extract_json(bytes: &[u8]) -> Result<String, ExtractError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ExtractError::Json(e.to_string()))?;
    let pretty =
        serde_json::to_string_pretty(&value).map_err(|e| ExtractError::Json(e.to_string()))?;
    Ok(format!("```json\n{}\n```", pretty))
}

/// Lines that are not valid JSON are kept verbatim.
fn extract_jsonl(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<String> = text
        .lines()
        .take(JSONL_MAX_LINES)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| match serde_json::from_str::<serde_json::Value>(line) {
            Ok(v) => v.to_string(),
            Err(_) => line.to_string(),
        })
        .collect();
    if lines.is_empty() {
        return String::new();
    }
    format!("# JSON Lines\n{}", lines.join("\n"))
}

fn extract_html(bytes: &[u8]) -> Result<String, ExtractError> {
    let html = String::from_utf8_lossy(bytes);
    let document = scraper::Html::parse_document(&html);
    let body_selector =
        scraper::Selector::parse("body").map_err(|e| ExtractError::Html(e.to_string()))?;

    let mut content = String::new();
    let Some(body) = document.select(&body_selector).next() else {
        return Ok(content);
    };
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript" | "template"));
        let trimmed = text.trim();
        if hidden || trimmed.is_empty() {
            continue;
        }
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(trimmed);
    }
    Ok(content)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

// ============ OOXML ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Concatenates the text of every `<*:t>` element; paragraph ends
/// (`<*:p>`) become newlines.
fn collect_t_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" if !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Numbered part names (`prefix<N>.xml`) sorted by `N`.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    collect_t_text(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut out = String::new();
    for (idx, name) in numbered_parts(&archive, "ppt/slides/slide").into_iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = collect_t_text(&xml)?;
        if text.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("## Slide {}\n", idx + 1));
        out.push_str(text.trim());
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let mut out = String::new();
    for name in numbered_parts(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let cells = extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?;
        if cells.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&cells);
    }
    Ok(out)
}

/// Workbooks without any string cells have no `sharedStrings.xml` part.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Shared-string and inline values of each cell, space separated.
fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut cell_is_shared_str = false;
    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_is_shared_str = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if s.is_empty() {
                    // nothing
                } else if cell_is_shared_str {
                    if let Some(shared) = s.parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                        cells.push(shared.clone());
                    }
                } else {
                    cells.push(s.to_string());
                }
                in_value = false;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => cell_is_shared_str = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}
