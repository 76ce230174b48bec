use std::fs::File;
use std::io;
use std::path::Path;

use contact_common::contact::Contact;
use tracing::{info, warn};

use crate::error::SourceError;
use crate::metrics_consts::CONTACTS_SKIPPED;

/// A finite, non-restartable stream of contacts.
///
/// Sources are driven from a blocking thread, so implementations are free to do synchronous I/O.
pub trait RecordSource: Send + 'static {
    /// The next contact, or `None` once the source is exhausted. An error aborts the run.
    fn next_contact(&mut self) -> Result<Option<Contact>, SourceError>;
}

impl RecordSource for std::vec::IntoIter<Contact> {
    fn next_contact(&mut self) -> Result<Option<Contact>, SourceError> {
        Ok(self.next())
    }
}

/// Column order of the contacts export.
const PHONE: usize = 0;
const FIRST_NAME: usize = 1;
const LAST_NAME: usize = 2;
const RASHI: usize = 3;
const AGE: usize = 4;

/// Reads contacts from a CSV export with a header row.
///
/// Columns are MOBILE, FIRST_NAME, LAST_NAME, RASHI, AGE and GENDER; anything past AGE is ignored
/// and missing trailing columns are read as empty. Rows that can't be decoded or have no phone
/// number are skipped with a warning, only I/O failures are fatal.
pub struct CsvSource<R> {
    reader: csv::Reader<R>,
    record: csv::StringRecord,
    row: u64,
}

impl CsvSource<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|error| SourceError::Open {
            path: path.to_owned(),
            error: error.into(),
        })?;

        info!(path = %path.display(), "reading contacts");
        Self::from_reader(file)
    }
}

impl<R: io::Read> CsvSource<R> {
    pub fn from_reader(reader: R) -> Result<Self, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        // Reading the header up front surfaces a broken file before any worker starts.
        reader.headers().map_err(SourceError::Header)?;

        Ok(Self {
            reader,
            record: csv::StringRecord::new(),
            row: 0,
        })
    }
}

impl<R: io::Read + Send + 'static> RecordSource for CsvSource<R> {
    fn next_contact(&mut self) -> Result<Option<Contact>, SourceError> {
        loop {
            self.row += 1;

            match self.reader.read_record(&mut self.record) {
                Ok(false) => return Ok(None),
                Ok(true) => match contact_from_record(&self.record) {
                    Some(contact) => return Ok(Some(contact)),
                    None => {
                        warn!(row = self.row, "skipping row without a phone number");
                        metrics::counter!(CONTACTS_SKIPPED, "reason" => "missing_phone")
                            .increment(1);
                    }
                },
                Err(error) if matches!(error.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(SourceError::Read {
                        row: self.row,
                        error,
                    });
                }
                Err(error) => {
                    warn!(row = self.row, "skipping malformed row: {}", error);
                    metrics::counter!(CONTACTS_SKIPPED, "reason" => "malformed").increment(1);
                }
            }
        }
    }
}

fn contact_from_record(record: &csv::StringRecord) -> Option<Contact> {
    let field = |index| record.get(index).unwrap_or_default();

    let phone = field(PHONE);
    if phone.is_empty() {
        return None;
    }

    Some(
        Contact::new(phone)
            .with_name(field(FIRST_NAME), field(LAST_NAME))
            .with_classification(field(RASHI), field(AGE)),
    )
}
