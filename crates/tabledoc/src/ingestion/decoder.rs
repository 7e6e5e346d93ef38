//! CSV decoding into field rows

use std::io::Read;
use tokio::sync::mpsc;

use crate::config::CsvConfig;
use crate::error::{Error, Result};

/// Turns a byte stream into rows of text fields
///
/// The first row produced is the header row. Decoding is lazy: records are
/// read from the underlying reader as the iterator advances.
#[derive(Debug, Clone)]
pub struct CsvDecoder {
    delimiter: u8,
    flexible: bool,
}

impl CsvDecoder {
    pub fn new(config: &CsvConfig) -> Result<Self> {
        if !config.delimiter.is_ascii() {
            return Err(Error::Config(format!(
                "CSV delimiter must be a single ASCII character, got '{}'",
                config.delimiter
            )));
        }

        Ok(Self {
            delimiter: config.delimiter as u8,
            flexible: config.flexible_rows,
        })
    }

    /// Decode a stream into field rows
    pub fn decode<R: Read>(&self, reader: R) -> CsvRows<R> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .flexible(self.flexible)
            .from_reader(reader);

        CsvRows {
            records: reader.into_records(),
            failed: false,
        }
    }

    /// Decode on the blocking pool, handing rows over a bounded channel.
    ///
    /// The reader is owned by the blocking task and dropped when the stream
    /// ends, fails, or the receiver goes away.
    pub fn stream<R>(&self, reader: R, capacity: usize) -> mpsc::Receiver<Result<Vec<String>>>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rows = self.decode(reader);

        tokio::task::spawn_blocking(move || {
            for row in rows {
                if tx.blocking_send(row).is_err() {
                    tracing::debug!("Row consumer dropped, stopping decode");
                    break;
                }
            }
        });

        rx
    }
}

impl Default for CsvDecoder {
    fn default() -> Self {
        Self {
            delimiter: b',',
            flexible: false,
        }
    }
}

/// Lazy sequence of decoded rows
///
/// Ends after the first error; a malformed row fails the whole stream.
pub struct CsvRows<R> {
    records: csv::StringRecordsIntoIter<R>,
    failed: bool,
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.records.next()? {
            Ok(record) => Some(Ok(record.iter().map(str::to_string).collect())),
            Err(e) => {
                self.failed = true;
                Some(Err(Error::from(e)))
            }
        }
    }
}
