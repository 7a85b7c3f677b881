use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::dao::{MediaSink, MessageStore, ScrapeRecord};
use crate::merge::merger::group_msgs;
use crate::prelude::*;

/// Filesystem sink backing `--local` runs: one JSON per canonical sequence,
/// scrape records keyed by their hash, media keyed by content hash.
pub struct FsStore {
    msgs_dir: PathBuf,
    records_dir: PathBuf,
    media_dir: PathBuf,
}

impl FsStore {
    pub fn new(base_dir: &Path, drive_id: &str) -> Result<Self> {
        let today = Local::now().date_naive().to_string().replace('-', "_");
        Self::new_with_date(base_dir, drive_id, &today)
    }

    fn new_with_date(base_dir: &Path, drive_id: &str, date: &str) -> Result<Self> {
        let msgs_dir = base_dir.join(format!("scrape_{date}_{drive_id}"));
        let records_dir = msgs_dir.join("records");
        let media_dir = base_dir.join(format!("scrape_media_{date}_{drive_id}"));
        fs::create_dir_all(&records_dir)?;
        fs::create_dir_all(&media_dir)?;
        Ok(FsStore { msgs_dir, records_dir, media_dir })
    }

    fn group_file(&self, key: &ConversationKey) -> PathBuf {
        self.msgs_dir.join(format!("{}.json", *key.group_id))
    }

    fn record_file(&self, msgs_hash: &str) -> PathBuf {
        self.records_dir.join(format!("{msgs_hash}.json"))
    }
}

impl MessageStore for FsStore {
    fn fetch_persisted(&self, keys: &[ConversationKey]) -> Result<Vec<Message>> {
        let mut msgs = vec![];
        for key in keys {
            let path = self.group_file(key);
            if path.exists() {
                let persisted: Vec<Message> = serde_json::from_str(&fs::read_to_string(&path)?)?;
                msgs.extend(persisted);
            }
        }
        Ok(msgs)
    }

    fn insert_messages(&mut self, msgs: &[Message]) -> EmptyRes {
        for (key, group) in group_msgs(msgs.to_vec()) {
            let path = self.group_file(&key);
            let mut sequence: Vec<Message> = if path.exists() {
                serde_json::from_str(&fs::read_to_string(&path)?)?
            } else {
                vec![]
            };
            sequence.extend(group);
            fs::write(&path, serde_json::to_string(&sequence)?)?;
            log::info!("Wrote messages to {}", path.display());
        }
        Ok(())
    }

    fn scrape_hash_exists(&self, msgs_hash: &str) -> Result<bool> {
        Ok(self.record_file(msgs_hash).exists())
    }

    fn insert_scrape_record(&mut self, record: &ScrapeRecord) -> EmptyRes {
        fs::write(self.record_file(&record.msgs_hash), serde_json::to_string(record)?)?;
        Ok(())
    }
}

impl MediaSink for FsStore {
    fn store_media(&mut self, key: &str, _mime_type: &str, content: &[u8]) -> EmptyRes {
        fs::write(self.media_dir.join(key), content)?;
        Ok(())
    }
}
