//! Spreadsheet ingestion: uploaded `.xlsx` / `.xls` bytes to an in-memory [`Dataset`].
//!
//! The first worksheet is read with calamine. The first non-empty row is the header;
//! column names are trimmed. Analysis over a dataset lives in [`analyze`].

pub mod analyze;

pub use analyze::{
    lookup_related_customers, summarize, ColumnTotal, CustomerLookup, Ranking, Summary,
    DEFAULT_LOOKUP_TOP_N,
};

use calamine::{Data, Range, Reader, Xls, Xlsx};
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Seek};

const XLSX_MEDIA_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const XLS_MEDIA_TYPE: &str = "application/vnd.ms-excel";

/// One cell of an ingested sheet.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric value; text cells are parsed tolerating thousands separators.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => crate::text::parse_number(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s.trim()),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(n) => CellValue::Number(*n),
            Data::Int(n) => CellValue::Number(*n as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            other => CellValue::Text(other.to_string()),
        }
    }
}

/// Ordered named columns and ordered rows. Every row has exactly one cell per column.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

/// Borrowed view of one row, addressable by column name.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    cells: &'a [CellValue],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a CellValue> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.cells.get(idx)
    }

    pub fn cells(&self) -> &'a [CellValue] {
        self.cells
    }
}

impl Dataset {
    /// Build a dataset from column names and rows. Names are trimmed; rows are padded or
    /// truncated to the column count.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(|c| c.trim().to_string()).collect();
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, CellValue::Empty);
                r
            })
            .collect();
        Self { columns, rows }
    }

    /// Build from raw sheet rows: the first non-empty row is the header, empty rows are dropped.
    pub fn from_sheet_rows(raw: Vec<Vec<CellValue>>) -> Self {
        let mut rows = raw
            .into_iter()
            .filter(|r| r.iter().any(|c| !c.is_empty()));
        let Some(header) = rows.next() else {
            return Self::new(Vec::new(), Vec::new());
        };
        let columns = header_names(&header);
        Self::new(columns, rows.collect())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of one column, in row order.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &CellValue> + '_ {
        self.rows.iter().filter_map(move |r| r.get(idx))
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(|cells| Row {
            columns: &self.columns,
            cells,
        })
    }
}

/// Header cells to unique, trimmed column names. Blank headers become `Unnamed: {i}`,
/// repeats get a `.{n}` suffix.
fn header_names(header: &[CellValue]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    header
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let base = cell.to_string().trim().to_string();
            let base = if base.is_empty() {
                format!("Unnamed: {}", i)
            } else {
                base
            };
            let n = seen.entry(base.clone()).or_insert(0);
            let name = if *n == 0 {
                base
            } else {
                format!("{}.{}", base, n)
            };
            *n += 1;
            name
        })
        .collect()
}

/// Spreadsheet encodings we can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetFormat {
    /// Office Open XML workbook (.xlsx, .xlsm).
    Xlsx,
    /// Legacy BIFF workbook (.xls).
    Xls,
}

impl SpreadsheetFormat {
    /// Format from the file extension, falling back to the media type.
    pub fn detect(declared_name: &str, media_type: Option<&str>) -> Option<Self> {
        Self::from_name(declared_name).or_else(|| media_type.and_then(Self::from_media_type))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let ext = name.trim().rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" | "xlsm" => Some(SpreadsheetFormat::Xlsx),
            "xls" => Some(SpreadsheetFormat::Xls),
            _ => None,
        }
    }

    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type.split(';').next().unwrap_or("").trim();
        if essence.eq_ignore_ascii_case(XLSX_MEDIA_TYPE) {
            Some(SpreadsheetFormat::Xlsx)
        } else if essence.eq_ignore_ascii_case(XLS_MEDIA_TYPE) {
            Some(SpreadsheetFormat::Xls)
        } else {
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unsupported file format: {name} (send an .xlsx or .xls spreadsheet)")]
    UnsupportedFormat { name: String },
    #[error("could not read spreadsheet {name}: {reason}")]
    CorruptFile { name: String, reason: String },
}

/// Parse an uploaded spreadsheet; the format comes from the declared file name.
pub fn ingest(data: &[u8], declared_name: &str) -> Result<Dataset, IngestError> {
    ingest_with_media_type(data, declared_name, None)
}

/// Parse an uploaded spreadsheet using the declared name and, when the name has no
/// recognized extension, the transport-supplied media type. Unsupported formats are
/// rejected before the bytes are looked at.
pub fn ingest_with_media_type(
    data: &[u8],
    declared_name: &str,
    media_type: Option<&str>,
) -> Result<Dataset, IngestError> {
    let format = SpreadsheetFormat::detect(declared_name, media_type).ok_or_else(|| {
        IngestError::UnsupportedFormat {
            name: declared_name.to_string(),
        }
    })?;
    let corrupt = |reason: String| IngestError::CorruptFile {
        name: declared_name.to_string(),
        reason,
    };
    let cursor = Cursor::new(data);
    let range = match format {
        SpreadsheetFormat::Xlsx => {
            let workbook = Xlsx::new(cursor).map_err(|e| corrupt(e.to_string()))?;
            first_sheet(workbook)
        }
        SpreadsheetFormat::Xls => {
            let workbook = Xls::new(cursor).map_err(|e| corrupt(e.to_string()))?;
            first_sheet(workbook)
        }
    }
    .map_err(corrupt)?;

    let raw: Vec<Vec<CellValue>> = range
        .rows()
        .map(|r| r.iter().map(CellValue::from).collect())
        .collect();
    let dataset = Dataset::from_sheet_rows(raw);
    log::debug!(
        "ingested {} ({:?}): {} rows x {} columns",
        declared_name,
        format,
        dataset.row_count(),
        dataset.column_count()
    );
    Ok(dataset)
}

fn first_sheet<RS, R>(mut workbook: R) -> Result<Range<Data>, String>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: fmt::Display,
{
    match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => Ok(range),
        Some(Err(e)) => Err(e.to_string()),
        None => Err("workbook has no worksheets".to_string()),
    }
}
