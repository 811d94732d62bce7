//! Delimited-text input.
//!
//! Exports are read with the `csv` crate in flexible mode, so rows of any
//! width come through and are shaped later. Records that cannot be decoded
//! are counted and skipped. Files ending in `.gz` are decompressed on the
//! fly.

use crate::error::SourceError;
use crate::shaper::RawRow;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Reader dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOptions {
    pub delimiter: u8,
    pub quote: u8,
    /// Skip the first line as a header row.
    pub has_headers: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            has_headers: true,
        }
    }
}

/// Rows read from one input and the number of lines that were skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOutcome {
    pub rows: Vec<RawRow>,
    pub malformed: usize,
}

/// Read every record of the file at `path`.
pub fn read_rows(path: &Path, options: SourceOptions) -> Result<ReadOutcome, SourceError> {
    let file = File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let input: Box<dyn Read> = if is_gzip(path) {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let outcome = read_from(input, options).map_err(|source| SourceError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    if outcome.rows.is_empty() && outcome.malformed == 0 {
        return Err(SourceError::Empty(path.to_path_buf()));
    }

    Ok(outcome)
}

/// Read records from any byte stream.
///
/// Only I/O failures are returned; undecodable records are counted in
/// [`ReadOutcome::malformed`].
pub fn read_from<R: Read>(input: R, options: SourceOptions) -> Result<ReadOutcome, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .quote(options.quote)
        .double_quote(true)
        .flexible(true)
        .has_headers(options.has_headers)
        .from_reader(input);

    let mut outcome = ReadOutcome::default();

    for result in reader.records() {
        match result {
            Ok(record) => outcome.rows.push(record.iter().map(to_cell).collect()),
            Err(err) if err.is_io_error() => return Err(err),
            Err(err) => {
                outcome.malformed += 1;
                log::debug!("skipping malformed record: {}", err);
            }
        }
    }

    Ok(outcome)
}

fn to_cell(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn cells(row: &[&str]) -> RawRow {
        row.iter().map(|c| to_cell(c)).collect()
    }

    #[test]
    fn test_read_quoted_and_ragged_rows() {
        let data = "id,name,keywords\n\
                    1,\"Pie, apple\",\"c(\"\"a\"\", \"\"b\"\")\"\n\
                    2,Short\n\
                    3,Long,x,extra\n";
        let outcome = read_from(data.as_bytes(), SourceOptions::default()).unwrap();

        assert_eq!(outcome.malformed, 0);
        assert_eq!(outcome.rows.len(), 3);
        assert_eq!(outcome.rows[0], cells(&["1", "Pie, apple", "c(\"a\", \"b\")"]));
        assert_eq!(outcome.rows[1], cells(&["2", "Short"]));
        assert_eq!(outcome.rows[2].len(), 4);
    }

    #[test]
    fn test_empty_cells_are_null() {
        let outcome = read_from("a,b,c\n1,,3\n".as_bytes(), SourceOptions::default()).unwrap();
        assert_eq!(outcome.rows[0], vec![Some("1".to_string()), None, Some("3".to_string())]);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let mut data = b"id,name\n1,ok\n".to_vec();
        data.extend_from_slice(b"2,\xff\xfe\n");
        data.extend_from_slice(b"3,fine\n");

        let outcome = read_from(data.as_slice(), SourceOptions::default()).unwrap();
        assert_eq!(outcome.malformed, 1);
        assert_eq!(outcome.rows, vec![cells(&["1", "ok"]), cells(&["3", "fine"])]);
    }

    #[test]
    fn test_custom_dialect() {
        let options = SourceOptions {
            delimiter: b';',
            quote: b'\'',
            has_headers: false,
        };
        let outcome = read_from("1;'a;b'\n".as_bytes(), options).unwrap();
        assert_eq!(outcome.rows, vec![cells(&["1", "a;b"])]);
    }

    #[test]
    fn test_read_rows_from_files() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("users.csv");
        std::fs::write(&plain, "id,name\n1,Ann\n2,Bo\n").unwrap();
        assert_eq!(read_rows(&plain, SourceOptions::default()).unwrap().rows.len(), 2);

        let gz = dir.path().join("users.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"id,name\n1,Ann\n2,Bo\n3,Cy\n").unwrap();
        encoder.finish().unwrap();
        assert_eq!(read_rows(&gz, SourceOptions::default()).unwrap().rows.len(), 3);

        let header_only = dir.path().join("empty.csv");
        std::fs::write(&header_only, "id,name\n").unwrap();
        assert!(matches!(
            read_rows(&header_only, SourceOptions::default()),
            Err(SourceError::Empty(_))
        ));

        let missing = dir.path().join("missing.csv");
        assert!(matches!(
            read_rows(&missing, SourceOptions::default()),
            Err(SourceError::Io { .. })
        ));
    }
}
