use chrono::NaiveDateTime;
use serde::Serialize;

use crate::prelude::*;

pub mod fs_dao;

/// Per-transcript record persisted alongside the merged messages, deduplicated
/// by the keyed hash of its serialized message list.
#[derive(Clone, Debug, Serialize)]
pub struct ScrapeRecord {
    pub scrape_datetime: NaiveDateTime,
    pub source: String,
    pub source_loc: String,
    pub msgs: Vec<Message>,
    pub msgs_hash: String,
}

impl ScrapeRecord {
    pub fn new(source_type: SourceType,
               source_loc: &str,
               msgs: Vec<Message>,
               scrape_datetime: NaiveDateTime,
               anonymizer: &Anonymizer) -> Result<Self> {
        let canonical_json = serde_json::to_string(&msgs)?;
        let msgs_hash = anonymizer.anonymize(&canonical_json, "");
        Ok(ScrapeRecord {
            scrape_datetime,
            source: source_type.label().to_owned(),
            source_loc: source_loc.to_owned(),
            msgs,
            msgs_hash,
        })
    }
}

/// Document-store seam. Remote implementations live with the deployment; the
/// in-repo ones are the in-memory store and the `--local` filesystem sink.
pub trait MessageStore {
    /// Previously-persisted sequences for the given conversations.
    fn fetch_persisted(&self, keys: &[ConversationKey]) -> Result<Vec<Message>>;

    fn insert_messages(&mut self, msgs: &[Message]) -> EmptyRes;

    fn scrape_hash_exists(&self, msgs_hash: &str) -> Result<bool>;

    fn insert_scrape_record(&mut self, record: &ScrapeRecord) -> EmptyRes;
}

/// Object-store seam: media content keyed by its hash.
pub trait MediaSink {
    fn store_media(&mut self, key: &str, mime_type: &str, content: &[u8]) -> EmptyRes;
}

#[derive(Default)]
pub struct InMemoryStore {
    pub msgs: Vec<Message>,
    pub scrape_records: Vec<ScrapeRecord>,
    /// key -> (mime type, content)
    pub media: HashMap<String, (String, Vec<u8>)>,
}

impl MessageStore for InMemoryStore {
    fn fetch_persisted(&self, keys: &[ConversationKey]) -> Result<Vec<Message>> {
        Ok(self.msgs.iter()
            .filter(|m| keys.contains(&m.conversation_key()))
            .cloned()
            .collect())
    }

    fn insert_messages(&mut self, msgs: &[Message]) -> EmptyRes {
        self.msgs.extend_from_slice(msgs);
        Ok(())
    }

    fn scrape_hash_exists(&self, msgs_hash: &str) -> Result<bool> {
        Ok(self.scrape_records.iter().any(|r| r.msgs_hash == msgs_hash))
    }

    fn insert_scrape_record(&mut self, record: &ScrapeRecord) -> EmptyRes {
        self.scrape_records.push(record.clone());
        Ok(())
    }
}

impl MediaSink for InMemoryStore {
    fn store_media(&mut self, key: &str, mime_type: &str, content: &[u8]) -> EmptyRes {
        self.media.insert(key.to_owned(), (mime_type.to_owned(), content.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::{assert_eq, assert_ne};

    use crate::test_utils::*;

    use super::*;

    #[test]
    fn scrape_record_hash_is_stable_and_content_sensitive() -> EmptyRes {
        let anonymizer = test_anonymizer();
        let msgs = vec![new_msg("g", "s", "Hi", dt("2020-07-28 19:35:00"), 0, 0)];
        let when = dt("2020-07-29 00:00:00");

        let r1 = ScrapeRecord::new(SourceType::GoogleDrive, "folder0", msgs.clone(), when, &anonymizer)?;
        let r2 = ScrapeRecord::new(SourceType::GoogleDrive, "folder0", msgs.clone(), when, &anonymizer)?;
        assert_eq!(r1.msgs_hash, r2.msgs_hash);
        assert_eq!(r1.source, "GOOGLE_DRIVE");

        let mut changed = msgs;
        changed[0].content = "Hi there".to_owned();
        let r3 = ScrapeRecord::new(SourceType::GoogleDrive, "folder0", changed, when, &anonymizer)?;
        assert_ne!(r1.msgs_hash, r3.msgs_hash);
        Ok(())
    }

    #[test]
    fn in_memory_store_round_trip() -> EmptyRes {
        let mut store = InMemoryStore::default();
        let msg = new_msg("g", "s", "Hi", dt("2020-07-28 19:35:00"), 0, 0);
        store.insert_messages(&[msg.clone()])?;

        let fetched = store.fetch_persisted(&[msg.conversation_key()])?;
        assert_eq!(fetched, vec![msg.clone()]);

        let other_key = ConversationKey {
            source_type: SourceType::GoogleDrive,
            source_loc: TEST_SOURCE_LOC.to_owned(),
            group_id: GroupId("other".to_owned()),
        };
        assert_eq!(store.fetch_persisted(&[other_key])?, vec![]);
        Ok(())
    }
}
