use crate::error::{Error, Result};
use crate::rag::IngestRequest;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use std::fs;
use std::io::Read;
use std::path::Path;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Text extracted from an uploaded file, ready for ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Document id; the file name for uploads
    pub document_id: String,
    pub content: String,
    pub mime_type: String,
}

impl Document {
    /// Load a text, CSV, Word or PDF file no larger than `max_bytes`
    pub fn from_file<P: AsRef<Path>>(file_path: P, max_bytes: u64) -> Result<Self> {
        let path = file_path.as_ref();
        let document_id = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Document(format!("invalid file name: {}", path.display())))?;

        let size = fs::metadata(path)?.len();
        if size > max_bytes {
            return Err(Error::Document(format!(
                "{} is {} bytes, the upload limit is {} bytes",
                document_id, size, max_bytes
            )));
        }

        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type for {}: {}", document_id, mime_type);

        let content = read_document_content(path, &document_id, &mime_type)?;
        Ok(Document {
            document_id,
            content,
            mime_type,
        })
    }

    pub fn into_ingest_request(self, user_id: impl Into<String>) -> IngestRequest {
        IngestRequest {
            user_id: user_id.into(),
            document_id: self.document_id,
            raw_text: self.content,
        }
    }
}

/// Read content from a document based on its MIME type
fn read_document_content(path: &Path, name: &str, mime_type: &str) -> Result<String> {
    let raw = match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", path.display());
            extract_text(path).map_err(|e| {
                Error::Document(format!(
                    "failed to extract text from PDF {}: {}",
                    path.display(),
                    e
                ))
            })?
        }
        mime if mime == DOCX_MIME => {
            info!("Processing Word document: {}", path.display());
            read_docx(path)?
        }
        mime if mime.starts_with("text/csv") => {
            info!("Processing CSV document: {}", path.display());
            render_csv(name, &decode_text(&fs::read(path)?))?
        }
        mime if mime.starts_with("text/") => {
            info!("Processing text document: {}", path.display());
            decode_text(&fs::read(path)?)
        }
        _ => {
            return Err(Error::Document(format!(
                "unsupported document format: {}. Supported formats are text, CSV, Word (.docx) and PDF",
                mime_type
            )))
        }
    };

    let content = normalize_whitespace(&raw);
    if content.is_empty() {
        warn!("{} contains no extractable text", path.display());
    }
    Ok(content)
}

/// Decode text as UTF-8, UTF-16 when a BOM says so, or Windows-1252
fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        let (text, _, _) = encoding.decode(bytes);
        return text.into_owned();
    }

    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }

    debug!("Text is not valid UTF-8, decoding as {}", WINDOWS_1252.name());
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// Render a CSV table as a column summary followed by one line per row
fn render_csv(name: &str, text: &str) -> Result<String> {
    let csv_error = |e: csv::Error| Error::Document(format!("failed to parse CSV {}: {}", name, e));

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader.headers().map_err(csv_error)?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let fields: Vec<String> = record
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_empty())
            .map(|(i, value)| match headers.get(i) {
                Some(header) if !header.is_empty() => format!("{}: {}", header, value),
                _ => value.to_string(),
            })
            .collect();
        if !fields.is_empty() {
            rows.push(fields.join(", "));
        }
    }

    let columns: Vec<&str> = headers.iter().collect();
    Ok(format!(
        "CSV File: {}\nColumns: {}\nNumber of rows: {}\n\n{}",
        name,
        columns.join(", "),
        rows.len(),
        rows.join("\n")
    ))
}

/// Extract paragraph text from a .docx package
fn read_docx(path: &Path) -> Result<String> {
    let docx_error =
        |e: zip::result::ZipError| Error::Document(format!("failed to open {}: {}", path.display(), e));

    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(docx_error)?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(docx_error)?
        .read_to_string(&mut xml)?;

    Ok(docx_text(&xml))
}

/// Text runs of WordprocessingML, one line per paragraph
fn docx_text(xml: &str) -> String {
    let mut text = String::new();
    let mut in_run = false;

    for segment in xml.split('<').skip(1) {
        let Some((tag, rest)) = segment.split_once('>') else {
            continue;
        };
        match tag {
            "w:t" => in_run = true,
            tag if tag.starts_with("w:t ") => in_run = !tag.ends_with('/'),
            "/w:t" => in_run = false,
            "/w:p" | "w:br/" | "w:cr/" => text.push('\n'),
            "w:tab/" | "/w:tc" => text.push('\t'),
            _ => {}
        }
        if in_run {
            text.push_str(&unescape_xml(rest));
        }
    }

    text
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Collapse repeated spaces and cap blank lines at one paragraph break
fn normalize_whitespace(text: &str) -> String {
    let text = text.replace('\r', "");
    let mut normalized = String::with_capacity(text.len());
    let mut prev_char = ' ';
    let mut newline_count = 0;

    for c in text.chars() {
        if c == '\n' {
            newline_count += 1;
            continue;
        }
        if newline_count > 0 {
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
            prev_char = '\n';
        }
        let c = if c == '\t' { ' ' } else { c };
        if c == ' ' && (prev_char == ' ' || prev_char == '\n') {
            continue;
        }
        normalized.push(c);
        prev_char = c;
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\n  And Windows\tline endings.  ";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_load_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handbook.txt");
        fs::write(&path, "Office hours:   9 to 5.\n\n\n\nClosed on Sundays.").unwrap();

        let document = Document::from_file(&path, 1024).unwrap();
        assert_eq!(document.document_id, "handbook.txt");
        assert_eq!(document.mime_type, "text/plain");
        assert_eq!(document.content, "Office hours: 9 to 5.\n\nClosed on Sundays.");
    }

    #[test]
    fn test_upload_limit() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(&[b'a'; 64]).unwrap();

        let result = Document::from_file(file.path(), 32);
        assert!(matches!(result, Err(Error::Document(_))));
    }

    #[test]
    fn test_unsupported_format() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"\x89PNG").unwrap();

        let result = Document::from_file(file.path(), 1024);
        assert!(matches!(result, Err(Error::Document(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Document::from_file("/definitely/not/here.txt", 1024);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_into_ingest_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "  hello   world ").unwrap();

        let request = Document::from_file(&path, 1024)
            .unwrap()
            .into_ingest_request("alice");
        assert_eq!(request.user_id, "alice");
        assert_eq!(request.document_id, "notes.md");
        assert_eq!(request.raw_text, "hello world");
    }

    #[test]
    fn test_latin1_text_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("menu.txt");
        // "Café crème à 3€" in Windows-1252
        fs::write(&path, b"Caf\xe9 cr\xe8me \xe0 3\x80").unwrap();

        let document = Document::from_file(&path, 1024).unwrap();
        assert_eq!(document.content, "Café crème à 3€");
    }

    #[test]
    fn test_utf16_text_with_bom_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hello".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_text(&bytes), "hello");
    }

    #[test]
    fn test_csv_is_rendered_as_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plans.csv");
        fs::write(&path, "plan,price\nBasic,10\nPro, 20\n").unwrap();

        let document = Document::from_file(&path, 1024).unwrap();
        assert_eq!(document.mime_type, "text/csv");
        assert_eq!(
            document.content,
            "CSV File: plans.csv\nColumns: plan, price\nNumber of rows: 2\n\nplan: Basic, price: 10\nplan: Pro, price: 20"
        );
    }

    #[test]
    fn test_csv_rows_skip_empty_cells() {
        let rendered = render_csv("sparse.csv", "city,note\nOslo,\n,\nLima,dry\n").unwrap();
        assert!(rendered.contains("Number of rows: 2"));
        assert!(rendered.ends_with("city: Oslo\ncity: Lima, note: dry"));
    }

    #[test]
    fn test_docx_paragraphs_are_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.docx");
        let xml = r#"<?xml version="1.0"?><w:document><w:body><w:p><w:r><w:t>Refunds &amp; returns</w:t></w:r></w:p><w:p><w:r><w:t xml:space="preserve">within </w:t></w:r><w:r><w:t>30 days.</w:t></w:r></w:p><w:tbl><w:tr><w:tc><w:p><w:r><w:t>Plan</w:t></w:r></w:p></w:tc></w:tr></w:tbl></w:body></w:document>"#;

        let mut writer = zip::ZipWriter::new(fs::File::create(&path).unwrap());
        writer
            .start_file("word/document.xml", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap();

        let document = Document::from_file(&path, 64 * 1024).unwrap();
        assert_eq!(document.mime_type, DOCX_MIME);
        assert_eq!(document.content, "Refunds & returns\nwithin 30 days.\nPlan");
    }

    #[test]
    fn test_docx_without_body_is_a_document_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.docx");
        let mut writer = zip::ZipWriter::new(fs::File::create(&path).unwrap());
        writer
            .start_file("word/styles.xml", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"<w:styles/>").unwrap();
        writer.finish().unwrap();

        let result = Document::from_file(&path, 64 * 1024);
        assert!(matches!(result, Err(Error::Document(_))));
    }
}
