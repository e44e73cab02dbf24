//! Static table of supported conversions.
//!
//! Input formats are grouped into document families. Every member of a family
//! may be converted into any other output of that family; the engine export
//! filter depends on the family (a PDF written from Calc uses a different
//! filter than one written from Writer).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};

/// The engine component that handles a group of formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFamily {
    /// Word processing documents (Writer).
    Text,
    /// Spreadsheets (Calc).
    Spreadsheet,
    /// Slide decks (Impress).
    Presentation,
}

/// An output format as seen from one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputFormat {
    extension: &'static str,
    filter: &'static str,
    mime: &'static str,
}

const fn out(extension: &'static str, filter: &'static str, mime: &'static str) -> OutputFormat {
    OutputFormat {
        extension,
        filter,
        mime,
    }
}

const MIME_DOC: &str = "application/msword";
const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const MIME_ODT: &str = "application/vnd.oasis.opendocument.text";
const MIME_XLS: &str = "application/vnd.ms-excel";
const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const MIME_ODS: &str = "application/vnd.oasis.opendocument.spreadsheet";
const MIME_PPT: &str = "application/vnd.ms-powerpoint";
const MIME_PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const MIME_ODP: &str = "application/vnd.oasis.opendocument.presentation";
const MIME_PDF: &str = "application/pdf";

const TEXT_INPUTS: &[&str] = &["doc", "docx", "odt", "rtf"];
const SPREADSHEET_INPUTS: &[&str] = &["xls", "xlsx", "ods", "csv"];
const PRESENTATION_INPUTS: &[&str] = &["ppt", "pptx", "odp"];

const TEXT_OUTPUTS: &[OutputFormat] = &[
    out("doc", "MS Word 97", MIME_DOC),
    out("docx", "MS Word 2007 XML", MIME_DOCX),
    out("pdf", "writer_pdf_Export", MIME_PDF),
    out("odt", "writer8", MIME_ODT),
    out("txt", "Text", "text/plain"),
    out("rtf", "Rich Text Format", "application/rtf"),
    out("html", "HTML (StarWriter)", "text/html"),
];

const SPREADSHEET_OUTPUTS: &[OutputFormat] = &[
    out("xls", "MS Excel 97", MIME_XLS),
    out("xlsx", "Calc MS Excel 2007 XML", MIME_XLSX),
    out("pdf", "calc_pdf_Export", MIME_PDF),
    out("ods", "calc8", MIME_ODS),
    out("csv", "Text - txt - csv (StarCalc):44,34,76", "text/csv"),
];

const PRESENTATION_OUTPUTS: &[OutputFormat] = &[
    out("ppt", "MS PowerPoint 97", MIME_PPT),
    out("pptx", "Impress MS PowerPoint 2007 XML", MIME_PPTX),
    out("pdf", "impress_pdf_Export", MIME_PDF),
    out("odp", "impress8", MIME_ODP),
];

/// MIME types accepted in place of a filename extension.
const INPUT_MIME_ALIASES: &[(&str, &str)] = &[
    (MIME_DOC, "doc"),
    (MIME_DOCX, "docx"),
    (MIME_ODT, "odt"),
    ("application/rtf", "rtf"),
    ("text/rtf", "rtf"),
    (MIME_XLS, "xls"),
    (MIME_XLSX, "xlsx"),
    (MIME_ODS, "ods"),
    ("text/csv", "csv"),
    (MIME_PPT, "ppt"),
    (MIME_PPTX, "pptx"),
    (MIME_ODP, "odp"),
];

/// A validated input→output pair together with what the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTarget {
    /// Normalized input extension (registry key).
    pub input: String,
    /// Normalized output extension.
    pub output: String,
    /// Family that handles the input.
    pub family: DocumentFamily,
    /// Engine export filter name.
    pub filter: &'static str,
    /// MIME type of the produced document.
    pub mime: &'static str,
}

impl ConversionTarget {
    /// The `--convert-to` argument understood by the engine.
    pub fn convert_to_arg(&self) -> String {
        format!("{}:{}", self.output, self.filter)
    }
}

/// Immutable mapping of allowed conversions, built once at startup.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    inputs: BTreeMap<&'static str, DocumentFamily>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    /// Build the registry from the static family tables.
    pub fn new() -> Self {
        let mut inputs = BTreeMap::new();
        for (members, family) in [
            (TEXT_INPUTS, DocumentFamily::Text),
            (SPREADSHEET_INPUTS, DocumentFamily::Spreadsheet),
            (PRESENTATION_INPUTS, DocumentFamily::Presentation),
        ] {
            for &ext in members {
                inputs.insert(ext, family);
            }
        }
        Self { inputs }
    }

    /// Sorted list of every accepted input format.
    pub fn input_formats(&self) -> Vec<&'static str> {
        self.inputs.keys().copied().collect()
    }

    /// Outputs reachable from `input`, sorted. Empty for unknown inputs.
    ///
    /// Converting a format to itself is never offered.
    pub fn allowed_outputs(&self, input: &str) -> Vec<&'static str> {
        let input = normalize(input);
        let Some(family) = self.inputs.get(input.as_str()) else {
            return Vec::new();
        };
        let mut outputs: Vec<&'static str> = outputs_for(*family)
            .iter()
            .map(|o| o.extension)
            .filter(|ext| *ext != input)
            .collect();
        outputs.sort_unstable();
        outputs
    }

    /// Validate a pair and return the engine parameters for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] listing supported inputs when the
    /// input is unknown, or the valid outputs when the pair is not allowed.
    pub fn resolve(&self, input: &str, output: &str) -> Result<ConversionTarget> {
        let input = normalize(input);
        let output = normalize(output);

        let Some(&family) = self.inputs.get(input.as_str()) else {
            let supported: Vec<String> =
                self.input_formats().into_iter().map(String::from).collect();
            return Err(Error::unsupported(
                format!(
                    "Unsupported input format: .{input}. Supported: {}",
                    supported.join(", ")
                ),
                supported,
            ));
        };

        let found = outputs_for(family)
            .iter()
            .find(|o| o.extension == output && output != input);

        match found {
            Some(fmt) => Ok(ConversionTarget {
                input,
                output,
                family,
                filter: fmt.filter,
                mime: fmt.mime,
            }),
            None => {
                let supported: Vec<String> = self
                    .allowed_outputs(&input)
                    .into_iter()
                    .map(String::from)
                    .collect();
                Err(Error::unsupported(
                    format!(
                        "Cannot convert .{input} to .{output}. Available: {}",
                        supported.join(", ")
                    ),
                    supported,
                ))
            }
        }
    }

    /// The whole table as `input -> sorted outputs`.
    pub fn table(&self) -> BTreeMap<&'static str, Vec<&'static str>> {
        self.inputs
            .keys()
            .map(|&input| (input, self.allowed_outputs(input)))
            .collect()
    }

    /// Infer the declared input format of an upload.
    ///
    /// The filename extension wins; the part's content type is consulted only
    /// when the filename carries no extension. The result is returned even if
    /// it is not a registry key so callers can report it.
    pub fn detect_input(&self, filename: Option<&str>, content_type: Option<&str>) -> Option<String> {
        if let Some(ext) = filename.and_then(extension_of) {
            return Some(ext);
        }
        let mime = content_type?.split(';').next()?.trim().to_ascii_lowercase();
        INPUT_MIME_ALIASES
            .iter()
            .find(|(alias, _)| *alias == mime)
            .map(|(_, ext)| (*ext).to_string())
    }
}

fn outputs_for(family: DocumentFamily) -> &'static [OutputFormat] {
    match family {
        DocumentFamily::Text => TEXT_OUTPUTS,
        DocumentFamily::Spreadsheet => SPREADSHEET_OUTPUTS,
        DocumentFamily::Presentation => PRESENTATION_OUTPUTS,
    }
}

/// Lower-case a format name and drop a leading dot.
pub fn normalize(format: &str) -> String {
    format.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Lower-cased extension of the last path component of a client filename.
///
/// Both `/` and `\` are treated as separators since browsers on Windows may
/// send full paths.
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}
