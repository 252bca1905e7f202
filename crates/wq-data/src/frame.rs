//! Column-oriented tabular dataset read from and written to CSV.

use csv::{ReaderBuilder, WriterBuilder};
use ndarray::{Array1, Array2};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;
use wq_types::{data_error, DataError, WqResult};

/// Cell spellings treated as missing on read.
const MISSING_MARKERS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "NULL", "null", "None", "#N/A",
];

fn is_missing(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell.trim())
}

/// Values of one column. Missing cells are `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_missing_at(&self, row: usize) -> bool {
        match self {
            Self::Numeric(v) => v[row].map_or(true, f64::is_nan),
            Self::Text(v) => v[row].is_none(),
        }
    }

    fn take(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(v) => Self::Numeric(rows.iter().map(|&i| v[i]).collect()),
            Self::Text(v) => Self::Text(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn cell(&self, row: usize) -> String {
        match self {
            Self::Numeric(v) => v[row].map(|x| format!("{x:?}")).unwrap_or_default(),
            Self::Text(v) => v[row].clone().unwrap_or_default(),
        }
    }

    /// A column is numeric when every present cell parses as a float.
    fn infer(cells: Vec<String>) -> Self {
        let parsed: Option<Vec<Option<f64>>> = cells
            .iter()
            .map(|c| {
                if is_missing(c) {
                    Some(None)
                } else {
                    c.trim().parse::<f64>().ok().map(Some)
                }
            })
            .collect();

        match parsed {
            Some(values) => Self::Numeric(values),
            None => Self::Text(
                cells
                    .into_iter()
                    .map(|c| if is_missing(&c) { None } else { Some(c) })
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn text(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Text(values),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.data, ColumnData::Numeric(_))
    }
}

/// Ordered set of equal-length named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    columns: Vec<Column>,
}

impl Frame {
    pub fn new(columns: Vec<Column>) -> WqResult<Self> {
        if let Some(first) = columns.first() {
            let rows = first.data.len();
            if let Some(bad) = columns.iter().find(|c| c.data.len() != rows) {
                return Err(DataError::ShapeMismatch {
                    message: format!(
                        "column {} has {} rows, expected {}",
                        bad.name,
                        bad.data.len(),
                        rows
                    ),
                }
                .into());
            }
        }

        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.name.as_str())) {
            return Err(data_error!("duplicate column name {}", dup.name));
        }

        Ok(Self { columns })
    }

    /// Load a CSV file with a header row.
    pub fn read_csv(path: impl AsRef<Path>) -> WqResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DataError::SourceNotFound(path.display().to_string()).into());
        }
        tracing::info!("Loading CSV data from: {}", path.display());

        let file = std::fs::File::open(path)?;
        let frame = Self::from_reader(file)?;
        tracing::info!(
            "Read in {} rows and {} columns from {}",
            frame.n_rows(),
            frame.n_cols(),
            path.display()
        );
        Ok(frame)
    }

    pub fn from_reader<R: Read>(reader: R) -> WqResult<Self> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| DataError::ParseError {
                message: format!("Failed to read CSV headers: {e}"),
            })?
            .clone();
        tracing::debug!("CSV headers: {:?}", headers);

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for (line_num, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| DataError::ParseError {
                message: format!("Failed to read CSV record at line {}: {}", line_num + 2, e),
            })?;
            for (col, cell) in cells.iter_mut().zip(record.iter()) {
                col.push(cell.to_string());
            }
        }

        let columns = headers
            .iter()
            .zip(cells)
            .map(|(name, values)| Column {
                name: name.to_string(),
                data: ColumnData::infer(values),
            })
            .collect();
        Self::new(columns)
    }

    /// Write with a header row; missing cells are left empty.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> WqResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.to_writer(file)?;
        tracing::info!("Wrote {} rows to {}", self.n_rows(), path.display());
        Ok(())
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> WqResult<()> {
        let mut wtr = WriterBuilder::new().from_writer(writer);
        let csv_err = |e: csv::Error| DataError::InvalidFormat {
            message: format!("CSV write failed: {e}"),
        };

        wtr.write_record(self.column_names()).map_err(csv_err)?;
        for row in 0..self.n_rows() {
            wtr.write_record(self.columns.iter().map(|c| c.data.cell(row)))
                .map_err(csv_err)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> WqResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                DataError::ColumnNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    pub fn numeric(&self, name: &str) -> WqResult<&[Option<f64>]> {
        match &self.column(name)?.data {
            ColumnData::Numeric(values) => Ok(values),
            ColumnData::Text(_) => Err(DataError::NotNumeric {
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Replace spaces in column names with underscores.
    pub fn normalize_column_names(&mut self) {
        for column in &mut self.columns {
            column.name = column.name.replace(' ', "_");
        }
    }

    /// Append a 0/1 column that is 1 where `source` equals `value`.
    pub fn add_indicator(&mut self, source: &str, value: &str, name: &str) -> WqResult<()> {
        let indicator: Vec<Option<f64>> = match &self.column(source)?.data {
            ColumnData::Text(values) => values
                .iter()
                .map(|v| Some(if v.as_deref() == Some(value) { 1.0 } else { 0.0 }))
                .collect(),
            ColumnData::Numeric(_) => {
                return Err(data_error!("indicator source {source} must be a text column"))
            }
        };

        self.columns.retain(|c| c.name != name);
        self.columns.push(Column::numeric(name, indicator));
        Ok(())
    }

    /// Rows with no missing cell in any column.
    pub fn drop_missing(&self) -> Frame {
        let keep: Vec<usize> = (0..self.n_rows())
            .filter(|&row| !self.columns.iter().any(|c| c.data.is_missing_at(row)))
            .collect();
        self.take_rows(&keep)
    }

    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> WqResult<Frame> {
        let columns = names
            .iter()
            .map(|n| self.column(n.as_ref()).cloned())
            .collect::<WqResult<Vec<_>>>()?;
        Frame::new(columns)
    }

    /// Rows at `rows`, in that order. Every index must be below `n_rows()`.
    pub(crate) fn take_rows(&self, rows: &[usize]) -> Frame {
        Frame {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.take(rows),
                })
                .collect(),
        }
    }

    /// Dense row-major matrix of every column. All columns must be numeric and complete.
    pub fn to_matrix(&self) -> WqResult<Array2<f64>> {
        let (rows, cols) = (self.n_rows(), self.n_cols());
        let mut matrix = Array2::<f64>::zeros((rows, cols));
        for (j, column) in self.columns.iter().enumerate() {
            let values = self.numeric(&column.name)?;
            for (i, value) in values.iter().enumerate() {
                matrix[[i, j]] = value.ok_or_else(|| {
                    data_error!("missing value in column {} at row {}", column.name, i)
                })?;
            }
        }
        Ok(matrix)
    }

    pub fn to_vector(&self, name: &str) -> WqResult<Array1<f64>> {
        self.numeric(name)?
            .iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| data_error!("missing value in column {name} at row {i}")))
            .collect::<WqResult<Vec<f64>>>()
            .map(Array1::from)
    }
}
