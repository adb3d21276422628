use std::collections::VecDeque;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::error::IngestError;

/// Running min/max/mean for one column. A column stops being numeric at the first
/// non-empty value that does not parse as a number.
#[derive(Debug, Clone)]
struct ColumnStats {
    numeric: bool,
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl Default for ColumnStats {
    fn default() -> Self {
        Self {
            numeric: true,
            min: f64::MAX,
            max: f64::MIN,
            sum: 0.0,
            count: 0,
        }
    }
}

impl ColumnStats {
    fn observe(&mut self, raw: &str) {
        if !self.numeric {
            return;
        }
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }
        match raw.replace(',', "").parse::<f64>() {
            Ok(value) if value.is_finite() => {
                self.min = self.min.min(value);
                self.max = self.max.max(value);
                self.sum += value;
                self.count += 1;
            }
            _ => self.numeric = false,
        }
    }
}

/// Column names, row count, first and last rows, and numeric statistics for one table.
/// Rows are streamed through `push`; only the preview rows are retained.
#[derive(Debug)]
struct TableSummary {
    headers: Vec<String>,
    stats: Vec<ColumnStats>,
    first: Vec<Vec<String>>,
    last: VecDeque<Vec<String>>,
    rows: usize,
    preview_rows: usize,
}

impl TableSummary {
    fn new(headers: Vec<String>, preview_rows: usize) -> Self {
        Self {
            stats: vec![ColumnStats::default(); headers.len()],
            headers,
            first: Vec::new(),
            last: VecDeque::new(),
            rows: 0,
            preview_rows,
        }
    }

    fn push(&mut self, row: Vec<String>) {
        for (column, value) in self.stats.iter_mut().zip(&row) {
            column.observe(value);
        }
        self.rows += 1;
        if self.first.len() < self.preview_rows {
            self.first.push(row);
        } else {
            self.last.push_back(row);
            if self.last.len() > self.preview_rows {
                self.last.pop_front();
            }
        }
    }

    fn render(&self, lines: &mut Vec<String>) {
        lines.push(format!("Rows: {}", self.rows));
        lines.push(format!("Columns: {}", self.headers.len()));
        lines.push(format!("Column names: {}", self.headers.join(", ")));

        if !self.first.is_empty() {
            lines.push(String::new());
            lines.push(format!("First {} rows:", self.first.len()));
            lines.push(self.headers.join(" | "));
            lines.extend(self.first.iter().map(|row| row.join(" | ")));
        }

        if !self.last.is_empty() {
            lines.push(String::new());
            lines.push(format!("Last {} rows:", self.last.len()));
            lines.push(self.headers.join(" | "));
            lines.extend(self.last.iter().map(|row| row.join(" | ")));
        }

        let numeric: Vec<String> = self
            .headers
            .iter()
            .zip(&self.stats)
            .filter(|(_, s)| s.numeric && s.count > 0)
            .map(|(name, s)| {
                format!(
                    "  {name}: min={:.2}, max={:.2}, mean={:.2}",
                    s.min,
                    s.max,
                    s.sum / s.count as f64
                )
            })
            .collect();
        if !numeric.is_empty() {
            lines.push(String::new());
            lines.push("Numeric column statistics:".to_string());
            lines.extend(numeric);
        }
    }
}

/// Summarize CSV bytes: column names, row count, first and last rows, and numeric
/// column statistics. The full dataset is never returned.
pub fn summarize_csv(bytes: &[u8], preview_rows: usize) -> Result<String, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| IngestError::Unsupported(format!("malformed CSV header: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::Unsupported("CSV has no columns".to_string()));
    }

    let mut table = TableSummary::new(headers, preview_rows);
    for record in reader.records() {
        let record =
            record.map_err(|e| IngestError::Unsupported(format!("malformed CSV row: {e}")))?;
        table.push(record.iter().map(str::to_string).collect());
    }

    let mut lines = vec!["CSV Data Summary".to_string()];
    table.render(&mut lines);
    Ok(lines.join("\n"))
}

/// Summarize an Excel workbook (xlsx, xlsm, xls, ods). Each sheet gets the same summary
/// as a CSV file, with its first row taken as the header.
pub fn summarize_workbook(bytes: &[u8], preview_rows: usize) -> Result<String, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| IngestError::Unsupported(format!("spreadsheet could not be read: {e}")))?;
    let sheets = workbook.worksheets();
    if sheets.is_empty() {
        return Err(IngestError::Unsupported("spreadsheet has no sheets".to_string()));
    }

    let names: Vec<&str> = sheets.iter().map(|(name, _)| name.as_str()).collect();
    let mut lines = vec![
        "Excel File Summary".to_string(),
        format!("Sheets: {}", sheets.len()),
        format!("Sheet names: {}", names.join(", ")),
    ];

    for (name, range) in &sheets {
        lines.push(String::new());
        lines.push(format!("=== Sheet: {name} ==="));
        let mut rows = range.rows();
        let Some(header) = rows.next() else {
            lines.push("(empty sheet)".to_string());
            continue;
        };
        let headers = header.iter().map(|cell| cell.to_string().trim().to_string()).collect();
        let mut table = TableSummary::new(headers, preview_rows);
        for row in rows {
            table.push(row.iter().map(cell_text).collect());
        }
        table.render(&mut lines);
    }

    Ok(lines.join("\n"))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rows: usize) -> String {
        let mut csv = String::from("date,close,note\n");
        for i in 0..rows {
            csv.push_str(&format!("2024-01-{:02},{},row{}\n", i + 1, 100 + i, i));
        }
        csv
    }

    #[test]
    fn summary_has_shape_and_edges() {
        let summary = summarize_csv(sample(12).as_bytes(), 3).unwrap();
        assert!(summary.contains("Rows: 12"));
        assert!(summary.contains("Columns: 3"));
        assert!(summary.contains("Column names: date, close, note"));
        assert!(summary.contains("First 3 rows:"));
        assert!(summary.contains("2024-01-01 | 100 | row0"));
        assert!(summary.contains("Last 3 rows:"));
        assert!(summary.contains("2024-01-12 | 111 | row11"));
        // middle rows are not carried
        assert!(!summary.contains("row5"));
    }

    #[test]
    fn numeric_stats_only_for_numeric_columns() {
        let summary = summarize_csv(sample(4).as_bytes(), 2).unwrap();
        assert!(summary.contains("close: min=100.00, max=103.00, mean=101.50"));
        assert!(!summary.contains("note: min"));
        assert!(!summary.contains("date: min"));
    }

    #[test]
    fn small_table_has_no_duplicate_rows() {
        let summary = summarize_csv(sample(2).as_bytes(), 5).unwrap();
        assert!(summary.contains("First 2 rows:"));
        assert!(!summary.contains("Last"));
    }

    #[test]
    fn ragged_rows_are_unsupported() {
        let result = summarize_csv(b"a,b\n1,2\n3\n", 5);
        assert!(matches!(result, Err(IngestError::Unsupported(_))));
    }

    #[test]
    fn invalid_utf8_is_unsupported() {
        let result = summarize_csv(&[b'a', b'\n', 0xff, 0xfe, b'\n'], 5);
        assert!(matches!(result, Err(IngestError::Unsupported(_))));
    }

    fn workbook(sheets: &[(&str, &[&[&str]])]) -> Vec<u8> {
        let mut book = rust_xlsxwriter::Workbook::new();
        for (name, rows) in sheets {
            let sheet = book.add_worksheet();
            sheet.set_name(*name).unwrap();
            for (r, row) in rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    match cell.parse::<f64>() {
                        Ok(n) => sheet.write_number(r as u32, c as u16, n).unwrap(),
                        Err(_) => sheet.write_string(r as u32, c as u16, *cell).unwrap(),
                    };
                }
            }
        }
        book.save_to_buffer().unwrap()
    }

    #[test]
    fn workbook_summarizes_every_sheet() {
        let prices: &[&[&str]] = &[
            &["day", "close"],
            &["1", "10"],
            &["2", "11"],
            &["3", "12"],
            &["4", "13"],
            &["5", "14"],
        ];
        let notes: &[&[&str]] = &[&["topic", "comment"], &["margins", "expanding"]];
        let bytes = workbook(&[("Prices", prices), ("Notes", notes)]);

        let summary = summarize_workbook(&bytes, 2).unwrap();
        assert!(summary.starts_with("Excel File Summary"));
        assert!(summary.contains("Sheets: 2"));
        assert!(summary.contains("Sheet names: Prices, Notes"));
        assert!(summary.contains("=== Sheet: Prices ===\nRows: 5\nColumns: 2"));
        assert!(summary.contains("Column names: day, close"));
        assert!(summary.contains("First 2 rows:\nday | close\n1 | 10\n2 | 11"));
        assert!(summary.contains("Last 2 rows:\nday | close\n4 | 13\n5 | 14"));
        assert!(!summary.contains("3 | 12"));
        assert!(summary.contains("close: min=10.00, max=14.00, mean=12.00"));
        assert!(summary.contains("=== Sheet: Notes ===\nRows: 1"));
        assert!(summary.contains("margins | expanding"));
        assert!(!summary.contains("comment: min"));
    }

    #[test]
    fn empty_sheet_is_noted() {
        let blank: &[&[&str]] = &[];
        let bytes = workbook(&[("Blank", blank)]);
        let summary = summarize_workbook(&bytes, 2).unwrap();
        assert!(summary.contains("=== Sheet: Blank ===\n(empty sheet)"));
    }

    #[test]
    fn corrupt_workbook_is_unsupported() {
        let result = summarize_workbook(b"PK\x03\x04 not really a zip", 2);
        assert!(matches!(result, Err(IngestError::Unsupported(_))));
    }
}
