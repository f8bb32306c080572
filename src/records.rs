//! Criminal record document store.
//!
//! One JSON document per record, written atomically through the storage
//! backend. ULID ids make the directory listing time-sortable, which is the
//! only ordering the API promises.

use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::rid::Rid;
use crate::storage::StorageManager;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record not found")]
    NotFound,

    #[error("invalid record id")]
    InvalidId,

    #[error("io error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("record document is malformed: {0:?}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriminalRecord {
    pub id: Rid,
    pub family_name: String,
    pub forename: String,
    pub folder_name: String,
    pub gender: String,
    pub date_of_birth: String,
    pub place_of_birth: String,
    pub nationality: String,
    pub distinguishing_marks: String,
    pub charges: String,
    /// URLs on the asset store
    #[serde(default)]
    pub images: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Incoming record fields, before an id is assigned.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordDraft {
    pub family_name: String,
    pub forename: String,
    pub folder_name: String,
    pub gender: String,
    pub date_of_birth: String,
    pub place_of_birth: String,
    pub nationality: String,
    pub distinguishing_marks: String,
    pub charges: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordQuery {
    /// Case-insensitive substring match on family_name
    pub family_name: Option<String>,
    /// Case-insensitive substring match on forename
    pub forename: Option<String>,
}

pub struct RecordStore {
    backend: Box<dyn StorageManager>,
    // single writer; scans don't take it
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(backend: Box<dyn StorageManager>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn create(&self, draft: RecordDraft, images: Vec<String>) -> Result<CriminalRecord, RecordError> {
        let record = CriminalRecord {
            id: Rid::new(),
            family_name: draft.family_name,
            forename: draft.forename,
            folder_name: draft.folder_name,
            gender: draft.gender,
            date_of_birth: draft.date_of_birth,
            place_of_birth: draft.place_of_birth,
            nationality: draft.nationality,
            distinguishing_marks: draft.distinguishing_marks,
            charges: draft.charges,
            images,
            created_at: chrono::Utc::now(),
        };

        let _guard = self.write_lock.lock().expect("record write lock poisoned");
        let data = serde_json::to_vec_pretty(&record)?;
        self.backend.write(&Self::ident(&record.id), &data)?;

        Ok(record)
    }

    pub fn get(&self, id: &Rid) -> Result<CriminalRecord, RecordError> {
        let ident = Self::ident(id);
        if !self.backend.exists(&ident) {
            return Err(RecordError::NotFound);
        }
        let data = self.backend.read(&ident)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn delete(&self, id: &Rid) -> Result<(), RecordError> {
        let _guard = self.write_lock.lock().expect("record write lock poisoned");
        let ident = Self::ident(id);
        if !self.backend.exists(&ident) {
            return Err(RecordError::NotFound);
        }
        self.backend.delete(&ident)?;
        Ok(())
    }

    /// List records matching the query, in id (insertion-time) order.
    /// Unreadable documents are skipped with a warning rather than failing
    /// the whole listing.
    pub fn search(&self, query: &RecordQuery) -> Result<Vec<CriminalRecord>, RecordError> {
        let family_re = build_filter(query.family_name.as_deref());
        let forename_re = build_filter(query.forename.as_deref());

        let mut idents: Vec<String> = self
            .backend
            .list()
            .into_iter()
            .filter(|name| name.ends_with(".json"))
            .collect();
        idents.sort();

        let mut records = Vec::new();
        for ident in idents {
            let record: CriminalRecord = match self
                .backend
                .read(&ident)
                .map_err(RecordError::from)
                .and_then(|data| serde_json::from_slice(&data).map_err(RecordError::from))
            {
                Ok(record) => record,
                Err(err) => {
                    log::warn!("skipping unreadable record {ident}: {err}");
                    continue;
                }
            };

            let family_ok = family_re
                .as_ref()
                .map(|re| re.is_match(&record.family_name))
                .unwrap_or(true);
            let forename_ok = forename_re
                .as_ref()
                .map(|re| re.is_match(&record.forename))
                .unwrap_or(true);

            if family_ok && forename_ok {
                records.push(record);
            }
        }

        Ok(records)
    }

    pub fn parse_id(raw: &str) -> Result<Rid, RecordError> {
        Rid::from_str(raw).map_err(|_| RecordError::InvalidId)
    }

    fn ident(id: &Rid) -> String {
        format!("{id}.json")
    }
}

/// Case-insensitive substring filter. User input is escaped, so the filter
/// text is never interpreted as a pattern.
fn build_filter(text: Option<&str>) -> Option<regex::Regex> {
    let text = text?;
    if text.is_empty() {
        return None;
    }
    let pattern = format!("(?i){}", regex::escape(text));
    // escaped input cannot produce an invalid pattern
    regex::Regex::new(&pattern).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendLocal;

    fn temp_store() -> (tempfile::TempDir, RecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend = BackendLocal::new(dir.path().to_str().unwrap()).unwrap();
        (dir, RecordStore::new(Box::new(backend)))
    }

    fn draft(family: &str, forename: &str) -> RecordDraft {
        RecordDraft {
            family_name: family.to_string(),
            forename: forename.to_string(),
            folder_name: format!("{family} {forename}"),
            gender: "M".to_string(),
            date_of_birth: "1980-01-01".to_string(),
            place_of_birth: "Unknown".to_string(),
            nationality: "Unknown".to_string(),
            distinguishing_marks: "None".to_string(),
            charges: "Fraud".to_string(),
        }
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, store) = temp_store();

        let created = store
            .create(draft("Doe", "John"), vec!["http://assets/1.jpg".to_string()])
            .unwrap();

        let fetched = store.get(&created.id).unwrap();
        assert_eq!(fetched.family_name, "Doe");
        assert_eq!(fetched.images, vec!["http://assets/1.jpg".to_string()]);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = temp_store();
        assert!(matches!(store.get(&Rid::new()), Err(RecordError::NotFound)));
    }

    #[test]
    fn test_delete() {
        let (_dir, store) = temp_store();

        let created = store.create(draft("Doe", "John"), vec![]).unwrap();
        store.delete(&created.id).unwrap();

        assert!(matches!(store.get(&created.id), Err(RecordError::NotFound)));
        assert!(matches!(
            store.delete(&created.id),
            Err(RecordError::NotFound)
        ));
    }

    #[test]
    fn test_search_without_filter_returns_all() {
        let (_dir, store) = temp_store();

        store.create(draft("Doe", "John"), vec![]).unwrap();
        store.create(draft("Roe", "Jane"), vec![]).unwrap();

        let all = store.search(&RecordQuery::default()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_search_filter_is_case_insensitive_substring() {
        let (_dir, store) = temp_store();

        store.create(draft("Doe", "John"), vec![]).unwrap();
        store.create(draft("Doherty", "Jane"), vec![]).unwrap();
        store.create(draft("Roe", "Jim"), vec![]).unwrap();

        let hits = store
            .search(&RecordQuery {
                family_name: Some("dO".to_string()),
                forename: None,
            })
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = store
            .search(&RecordQuery {
                family_name: Some("doe".to_string()),
                forename: Some("JOHN".to_string()),
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].forename, "John");
    }

    #[test]
    fn test_search_filter_escapes_regex_metacharacters() {
        let (_dir, store) = temp_store();

        store.create(draft("D.e", "John"), vec![]).unwrap();
        store.create(draft("Dxe", "Jane"), vec![]).unwrap();

        let hits = store
            .search(&RecordQuery {
                family_name: Some("D.e".to_string()),
                forename: None,
            })
            .unwrap();
        // the dot is literal, so only one record matches
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].family_name, "D.e");
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert!(matches!(
            RecordStore::parse_id("not-a-ulid"),
            Err(RecordError::InvalidId)
        ));
    }
}
