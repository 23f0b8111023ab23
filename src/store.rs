use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::db::Database;
use crate::models::{AnalysisResult, OfferInput, SavedOffer};

const OFFERS_BLOB: &str = "savedOffers";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("saved offers could not be read and were reset: {0}")]
    Corrupt(String),
    #[error("id prefix '{0}' matches more than one saved offer")]
    AmbiguousId(String),
}

/// The archive of saved analyses, newest first. Every mutation rewrites the
/// whole collection before the in-memory copy changes.
pub struct OfferStore {
    db: Database,
    offers: Vec<SavedOffer>,
    load_issue: Option<StoreError>,
}

impl OfferStore {
    /// Loads the persisted collection. An unreadable blob never fails the
    /// load: the store starts empty and keeps the reason in `load_issue`.
    pub fn load(db: Database) -> Self {
        let parsed = db
            .read_blob(OFFERS_BLOB)
            .map_err(|e| format!("{:#}", e))
            .and_then(|body| match body {
                Some(body) => serde_json::from_str::<Vec<SavedOffer>>(&body).map_err(|e| e.to_string()),
                None => Ok(Vec::new()),
            });

        let (offers, load_issue) = match parsed {
            Ok(offers) => (offers, db.recovered().map(|reason| StoreError::Corrupt(reason.to_string()))),
            Err(reason) => {
                warn!(
                    "Failed to parse saved offers in {}, starting with an empty archive: {}",
                    db.path().display(),
                    reason
                );
                (Vec::new(), Some(StoreError::Corrupt(reason)))
            }
        };

        Self { db, offers, load_issue }
    }

    pub fn load_issue(&self) -> Option<&StoreError> {
        self.load_issue.as_ref()
    }

    pub fn list(&self) -> &[SavedOffer] {
        &self.offers
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SavedOffer> {
        self.offers.iter().find(|offer| offer.id == id)
    }

    /// Resolves a full id or a unique id prefix.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Option<&SavedOffer>, StoreError> {
        if let Some(offer) = self.get(prefix) {
            return Ok(Some(offer));
        }
        let mut matches = self.offers.iter().filter(|offer| offer.id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(_), Some(_)) => Err(StoreError::AmbiguousId(prefix.to_string())),
            (first, _) => Ok(first),
        }
    }

    /// Archives a new record at the front of the collection. Duplicate
    /// detection is the caller's job (see `is_already_saved`).
    pub fn save(&mut self, input: OfferInput, result: AnalysisResult) -> Result<SavedOffer> {
        let offer = SavedOffer {
            id: uuid::Uuid::new_v4().to_string(),
            input,
            result,
            timestamp: Utc::now(),
        };

        let mut next = Vec::with_capacity(self.offers.len() + 1);
        next.push(offer.clone());
        next.extend(self.offers.iter().cloned());
        self.replace(next)?;

        info!("Saved offer {} ({} in {})", offer.id, offer.input.job_title, offer.input.city);
        Ok(offer)
    }

    /// Removes the record with `id`. Returns false when there was none.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        if self.get(id).is_none() {
            return Ok(false);
        }
        let next: Vec<SavedOffer> = self.offers.iter().filter(|offer| offer.id != id).cloned().collect();
        self.replace(next)?;
        info!("Deleted offer {}", id);
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.offers.len();
        self.replace(Vec::new())?;
        info!("Cleared {} saved offer(s)", removed);
        Ok(removed)
    }

    fn replace(&mut self, next: Vec<SavedOffer>) -> Result<()> {
        let body = serde_json::to_string(&next).context("Failed to serialize saved offers")?;
        self.db.write_blob(OFFERS_BLOB, &body)?;
        self.offers = next;
        self.load_issue = None;
        Ok(())
    }
}

/// True when an archived record has the same job title, gross salary and
/// city as `input`. This is the approximate identity the save action uses.
pub fn is_already_saved(offers: &[SavedOffer], input: &OfferInput) -> bool {
    offers.iter().any(|offer| {
        offer.input.job_title == input.job_title
            && offer.input.gross_annual_salary == input.gross_annual_salary
            && offer.input.city == input.city
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    fn empty_store() -> OfferStore {
        OfferStore::load(Database::open_in_memory().unwrap())
    }

    fn temp_db_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("offerlens_store_{}.db", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_save_prepends_exact_record() {
        let mut store = empty_store();
        store
            .save(fixtures::offer("Analyst", "Paris", "EUR", 60000), fixtures::result("NEGOTIATE", 42000))
            .unwrap();

        let input = fixtures::offer("Engineer", "Berlin", "EUR", 90000);
        let result = fixtures::result("ACCEPT", 54000);
        let saved = store.save(input.clone(), result.clone()).unwrap();

        let offers = store.list();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].id, saved.id);
        assert_eq!(offers[0].input, input);
        assert_eq!(offers[0].result, result);
        assert_eq!(offers[1].input.job_title, "Analyst");
    }

    #[test]
    fn test_save_generates_unique_ids() {
        let mut store = empty_store();
        let input = fixtures::offer("Engineer", "Berlin", "EUR", 90000);
        let a = store.save(input.clone(), fixtures::result("ACCEPT", 54000)).unwrap();
        let b = store.save(input, fixtures::result("ACCEPT", 54000)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_delete_preserves_order_of_others() {
        let mut store = empty_store();
        let mut ids = Vec::new();
        for title in ["A", "B", "C", "D"] {
            let offer = store
                .save(fixtures::offer(title, "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
                .unwrap();
            ids.push(offer.id);
        }

        assert!(store.delete(&ids[1]).unwrap());

        let titles: Vec<&str> = store.list().iter().map(|o| o.input.job_title.as_str()).collect();
        assert_eq!(titles, vec!["D", "C", "A"]);
        assert!(store.get(&ids[1]).is_none());
    }

    #[test]
    fn test_delete_unknown_id_is_noop() {
        let mut store = empty_store();
        store
            .save(fixtures::offer("A", "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
            .unwrap();
        assert!(!store.delete("missing").unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear_empties_list() {
        let mut store = empty_store();
        for title in ["A", "B"] {
            store
                .save(fixtures::offer(title, "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
                .unwrap();
        }
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_reload_round_trip_preserves_every_field() {
        let path = temp_db_path();
        let originals = {
            let mut store = OfferStore::load(Database::open_at(path.clone()).unwrap());
            store
                .save(fixtures::offer("A", "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
                .unwrap();
            store
                .save(fixtures::offer("B", "Austin", "USD", 150000), fixtures::result("REJECT", 110000))
                .unwrap();
            store.list().to_vec()
        };

        let reloaded = OfferStore::load(Database::open_at(path.clone()).unwrap());
        assert!(reloaded.load_issue().is_none());
        assert_eq!(reloaded.list(), originals.as_slice());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_corrupt_blob_degrades_to_empty() {
        let db = Database::open_in_memory().unwrap();
        db.write_blob(OFFERS_BLOB, "[{\"id\": ").unwrap();

        let mut store = OfferStore::load(db);
        assert!(store.is_empty());
        assert!(matches!(store.load_issue(), Some(StoreError::Corrupt(_))));

        // The next mutation rewrites a clean collection.
        store
            .save(fixtures::offer("A", "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
            .unwrap();
        assert!(store.load_issue().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unreadable_database_file_degrades_to_empty() {
        let dir = std::env::temp_dir().join(format!("offerlens_store_dir_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("offerlens.db"), vec![0xAB; 512]).unwrap();

        let mut store = OfferStore::load(Database::open(&dir).unwrap());
        assert!(store.is_empty());
        assert!(matches!(store.load_issue(), Some(StoreError::Corrupt(_))));

        store
            .save(fixtures::offer("A", "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
            .unwrap();
        drop(store);

        let reloaded = OfferStore::load(Database::open(&dir).unwrap());
        assert!(reloaded.load_issue().is_none());
        assert_eq!(reloaded.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_failed_write_leaves_collection_unchanged() {
        let mut store = empty_store();
        for title in ["A", "B"] {
            store
                .save(fixtures::offer(title, "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
                .unwrap();
        }
        let before = store.list().to_vec();
        let first_id = before[0].id.clone();
        store.db.drop_blobs_table().unwrap();

        assert!(store
            .save(fixtures::offer("C", "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
            .is_err());
        assert_eq!(store.list(), before.as_slice());

        assert!(store.delete(&first_id).is_err());
        assert_eq!(store.list(), before.as_slice());

        assert!(store.clear().is_err());
        assert_eq!(store.list(), before.as_slice());
    }

    #[test]
    fn test_find_by_prefix() {
        let mut store = empty_store();
        let saved = store
            .save(fixtures::offer("A", "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
            .unwrap();

        let found = store.find_by_prefix(saved.short_id()).unwrap().unwrap();
        assert_eq!(found.id, saved.id);
        assert!(store.find_by_prefix(&saved.id).unwrap().is_some());
        assert!(store.find_by_prefix("zzzz").unwrap().is_none());

        store
            .save(fixtures::offer("B", "Berlin", "EUR", 90000), fixtures::result("ACCEPT", 54000))
            .unwrap();
        assert!(matches!(store.find_by_prefix(""), Err(StoreError::AmbiguousId(_))));
    }

    #[test]
    fn test_is_already_saved_uses_title_salary_and_city() {
        let mut store = empty_store();
        let input = fixtures::offer("Engineer", "Berlin", "EUR", 90000);
        store.save(input.clone(), fixtures::result("ACCEPT", 54000)).unwrap();

        // Other fields are ignored by the identity rule.
        let mut same_identity = input.clone();
        same_identity.country = "Austria".to_string();
        same_identity.currency = "USD".to_string();
        assert!(is_already_saved(store.list(), &same_identity));

        let mut different_salary = input.clone();
        different_salary.gross_annual_salary = 95000;
        assert!(!is_already_saved(store.list(), &different_salary));

        let mut different_city = input;
        different_city.city = "Munich".to_string();
        assert!(!is_already_saved(store.list(), &different_city));
    }
}
