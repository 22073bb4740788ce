use crate::report::RawReport;
use csv_core::{ReadRecordResult, Reader};
use thiserror::Error;

const INITIAL_OUTPUT_BYTES: usize = 1024;
const INITIAL_FIELD_SLOTS: usize = 32;

/// Malformed tabular input. Record numbers are 1-based and count the header.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Record {record}: expected {expected} fields, found {found}")]
    ColumnCount {
        record: usize,
        expected: usize,
        found: usize,
    },
    #[error("Record {record}: invalid UTF-8")]
    InvalidUtf8 { record: usize },
}

/// Incremental CSV decoder producing one [`RawReport`] per data row.
///
/// The first record is the header; every later record is zipped against it
/// by position. Input may be pushed in arbitrary chunks (a chunk boundary can
/// fall inside a field or a quoted newline) and rows are returned as soon as
/// they are complete. Blank lines are skipped.
pub struct RowParser {
    reader: Reader,
    header: Option<Vec<String>>,
    output: Vec<u8>,
    output_len: usize,
    ends: Vec<usize>,
    ends_len: usize,
    records: usize,
}

impl Default for RowParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RowParser {
    pub fn new() -> Self {
        Self {
            reader: Reader::new(),
            header: None,
            output: vec![0; INITIAL_OUTPUT_BYTES],
            output_len: 0,
            ends: vec![0; INITIAL_FIELD_SLOTS],
            ends_len: 0,
            records: 0,
        }
    }

    /// Column names, once the header record has been read.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Feeds the next chunk and returns the rows it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RawReport>, ParseError> {
        let mut rows = Vec::new();
        // csv-core reads an empty input as end of stream
        if !chunk.is_empty() {
            self.process(chunk, &mut rows)?;
        }
        Ok(rows)
    }

    /// Signals end of input and returns the final row, if one was pending.
    pub fn finish(mut self) -> Result<Vec<RawReport>, ParseError> {
        let mut rows = Vec::new();
        self.process(&[], &mut rows)?;
        Ok(rows)
    }

    fn process(&mut self, mut input: &[u8], rows: &mut Vec<RawReport>) -> Result<(), ParseError> {
        let at_eof = input.is_empty();
        loop {
            let (result, nin, nout, nend) = self.reader.read_record(
                input,
                &mut self.output[self.output_len..],
                &mut self.ends[self.ends_len..],
            );
            input = &input[nin..];
            self.output_len += nout;
            self.ends_len += nend;

            match result {
                ReadRecordResult::InputEmpty | ReadRecordResult::End => return Ok(()),
                ReadRecordResult::OutputFull => {
                    let len = self.output.len();
                    self.output.resize(len * 2, 0);
                }
                ReadRecordResult::OutputEndsFull => {
                    let len = self.ends.len();
                    self.ends.resize(len * 2, 0);
                }
                ReadRecordResult::Record => {
                    self.complete_record(rows)?;
                    if input.is_empty() && !at_eof {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn complete_record(&mut self, rows: &mut Vec<RawReport>) -> Result<(), ParseError> {
        self.records += 1;
        let record = self.records;

        let mut fields = Vec::with_capacity(self.ends_len);
        let mut start = 0;
        for &end in &self.ends[..self.ends_len] {
            let value = std::str::from_utf8(&self.output[start..end])
                .map_err(|_| ParseError::InvalidUtf8 { record })?;
            fields.push(value.to_owned());
            start = end;
        }
        self.output_len = 0;
        self.ends_len = 0;

        match &self.header {
            None => {
                if let Some(first) = fields.first_mut() {
                    if let Some(stripped) = first.strip_prefix('\u{feff}') {
                        *first = stripped.to_owned();
                    }
                }
                self.header = Some(fields);
            }
            Some(header) => {
                if fields.len() != header.len() {
                    return Err(ParseError::ColumnCount {
                        record,
                        expected: header.len(),
                        found: fields.len(),
                    });
                }
                rows.push(header.iter().cloned().zip(fields).collect());
            }
        }
        Ok(())
    }
}

/// Parses a complete in-memory CSV document.
pub fn parse_reports(input: &[u8]) -> Result<Vec<RawReport>, ParseError> {
    let mut parser = RowParser::new();
    let mut rows = parser.push(input)?;
    rows.extend(parser.finish()?);
    Ok(rows)
}
