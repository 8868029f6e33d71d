//! Append-only CSV store for reviewed contact records.
//!
//! Every append is a full read-modify-write of the table: read the existing
//! rows, add one, write everything to a temp file in the same directory and
//! rename it over the original. A mutex serialises appends within the
//! process, so concurrent saves never lose a row.

use crate::error::StorageError;
use crate::output::ExtractionRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Column headers, in file order.
pub const COLUMNS: [&str; 5] = [
    "Owner Name",
    "Company Name",
    "Email",
    "Phone Numbers",
    "Address",
];

/// Separator used when a list field is flattened into one cell.
pub const LIST_SEPARATOR: &str = " ,";

/// One row of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRow {
    #[serde(rename = "Owner Name")]
    pub owner_name: String,
    #[serde(rename = "Company Name")]
    pub company_name: String,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Phone Numbers")]
    pub phone_numbers: String,
    #[serde(rename = "Address")]
    pub address: String,
}

impl From<&ExtractionRecord> for ContactRow {
    fn from(r: &ExtractionRecord) -> Self {
        let join = |set: &std::collections::BTreeSet<String>| {
            set.iter().map(String::as_str).collect::<Vec<_>>().join(LIST_SEPARATOR)
        };
        Self {
            owner_name: r.primary_owner.clone(),
            company_name: r.primary_company.clone(),
            email: join(&r.emails),
            phone_numbers: join(&r.phone_numbers),
            address: r.address.clone(),
        }
    }
}

/// A list field the review UI may send as an array or as edited text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListOrString {
    List(Vec<String>),
    Text(String),
}

impl ListOrString {
    fn flatten(&self) -> String {
        match self {
            ListOrString::List(items) => items.join(LIST_SEPARATOR),
            ListOrString::Text(s) => s.clone(),
        }
    }
}

/// Body of a save request: a (possibly hand-edited) extraction record.
///
/// Unknown keys such as `potential_names` or `debug_raw` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub primary_owner: String,
    #[serde(default)]
    pub primary_company: String,
    #[serde(default)]
    pub emails: Option<ListOrString>,
    #[serde(default)]
    pub phone_numbers: Option<ListOrString>,
    #[serde(default)]
    pub address: String,
}

impl SaveRequest {
    pub fn to_row(&self) -> ContactRow {
        ContactRow {
            owner_name: self.primary_owner.clone(),
            company_name: self.primary_company.clone(),
            email: self.emails.as_ref().map(ListOrString::flatten).unwrap_or_default(),
            phone_numbers: self
                .phone_numbers
                .as_ref()
                .map(ListOrString::flatten)
                .unwrap_or_default(),
            address: self.address.clone(),
        }
    }
}

/// CSV file holding one [`ContactRow`] per saved card.
#[derive(Debug)]
pub struct CsvStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Append one row, creating the file (and its directory) on first use.
    pub fn append(&self, row: &ContactRow) -> Result<usize, StorageError> {
        // A poisoned lock only means an earlier append panicked; the file
        // itself is still whole thanks to the rename.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut rows = self.read_rows()?;
        rows.push(row.clone());
        self.write_rows(&rows)?;
        info!("Saved row {} to {}", rows.len(), self.path.display());
        Ok(rows.len())
    }

    /// Read back every row.
    pub fn rows(&self) -> Result<Vec<ContactRow>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_rows()
    }

    fn read_rows(&self) -> Result<Vec<ContactRow>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| self.csv_err(e))?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<ContactRow>, _>>()
            .map_err(|e| self.csv_err(e))?;
        debug!("Read {} rows from {}", rows.len(), self.path.display());
        Ok(rows)
    }

    fn write_rows(&self, rows: &[ContactRow]) -> Result<(), StorageError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_err(&dir, e))?;

        let tmp = NamedTempFile::new_in(&dir).map_err(|e| self.io_err(&dir, e))?;
        let mut writer = csv::Writer::from_writer(tmp);
        if rows.is_empty() {
            writer.write_record(COLUMNS).map_err(|e| self.csv_err(e))?;
        }
        for row in rows {
            writer.serialize(row).map_err(|e| self.csv_err(e))?;
        }
        let mut tmp = writer
            .into_inner()
            .map_err(|e| self.io_err(&self.path, e.into_error()))?;
        tmp.flush().map_err(|e| self.io_err(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.io_err(&self.path, e.error))?;
        Ok(())
    }

    fn io_err(&self, path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> StorageError {
        StorageError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn row(owner: &str) -> ContactRow {
        ContactRow {
            owner_name: owner.into(),
            company_name: "Acme Traders".into(),
            email: "a@acme.com".into(),
            phone_numbers: "+15551234567".into(),
            address: "221B Baker Street, London".into(),
        }
    }

    #[test]
    fn append_creates_file_with_headers() {
        let dir = TempDir::new().unwrap();
        let store = CsvStore::new(dir.path().join("extracted").join("cards.csv"));
        assert!(!store.exists());
        assert_eq!(store.append(&row("Jane Doe")).unwrap(), 1);

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("Owner Name,Company Name,Email,Phone Numbers,Address"));
        assert_eq!(store.rows().unwrap(), vec![row("Jane Doe")]);
    }

    #[test]
    fn appends_preserve_existing_rows_in_order() {
        let dir = TempDir::new().unwrap();
        let store = CsvStore::new(dir.path().join("cards.csv"));
        store.append(&row("A One")).unwrap();
        store.append(&row("B Two")).unwrap();
        let owners: Vec<_> = store.rows().unwrap().into_iter().map(|r| r.owner_name).collect();
        assert_eq!(owners, ["A One", "B Two"]);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CsvStore::new(dir.path().join("cards.csv")));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.append(&row(&format!("Person {i}"))).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.rows().unwrap().len(), 8);
    }

    #[test]
    fn save_request_accepts_lists_or_text() {
        let req: SaveRequest = serde_json::from_str(
            r#"{"primary_owner":"Jane Doe","emails":["a@x.com","b@x.com"],
                "phone_numbers":"+911234567890","debug_raw":"ignored"}"#,
        )
        .unwrap();
        let r = req.to_row();
        assert_eq!(r.email, "a@x.com ,b@x.com");
        assert_eq!(r.phone_numbers, "+911234567890");
        assert_eq!(r.company_name, "");
    }

    #[test]
    fn null_list_fields_are_empty() {
        let req: SaveRequest =
            serde_json::from_str(r#"{"primary_owner":"X Y","emails":null}"#).unwrap();
        assert_eq!(req.to_row().email, "");
    }

    #[test]
    fn record_rows_join_sets() {
        let record = ExtractionRecord {
            emails: ["b@x.com".to_string(), "a@x.com".to_string()].into(),
            ..Default::default()
        };
        assert_eq!(ContactRow::from(&record).email, "a@x.com ,b@x.com");
    }
}
