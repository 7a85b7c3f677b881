use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Local;
use itertools::Itertools;

use crate::dao::{MediaSink, MessageStore, ScrapeRecord};
use crate::drive::{DriveClient, FileRecord};
use crate::loader::split_records;
use crate::loader::whatsapp_text::parse_transcript;
use crate::media;
use crate::merge::{merger, reconciler};
use crate::prelude::*;

const DOWNLOAD_WORKERS: usize = 4;
const REMOTE_ATTEMPTS: usize = 3;

pub struct IngestOptions {
    pub skip_media: bool,
}

#[derive(Debug)]
pub struct IngestOutcome {
    pub merged_msg_count: usize,
    pub inserted_msg_count: usize,
    pub media_file_count: usize,
    pub skipped_file_count: usize,
    pub total_groups: usize,
    pub failed_groups: usize,
}

impl IngestOutcome {
    /// The run only counts as failed when no conversation survived.
    pub fn all_conversations_failed(&self) -> bool {
        self.total_groups > 0 && self.failed_groups == self.total_groups
    }
}

/// Drives the whole ingestion: list the dump, download and parse transcripts,
/// link media, merge per conversation, reconcile against the store, persist.
pub fn ingest(drive: &DriveClient,
              store: &mut dyn MessageStore,
              media_sink: &mut dyn MediaSink,
              anonymizer: &Anonymizer,
              drive_id: &str,
              options: &IngestOptions,
              cancel: &CancelToken) -> Result<IngestOutcome> {
    let mut skipped_file_count = 0;

    // 1. List the dump and split it into transcripts and media.
    cancel.ensure_live()?;
    let files = drive.list_folder(drive_id)?;
    if files.is_empty() {
        bail!(IngestError::InvalidInput(
            format!("found 0 files at {drive_id}, check the url and credentials")));
    }
    let (text_files, media_records) = split_records(files);
    log::info!("Retrieved {} files ({} transcripts, {} media) from {drive_id}",
               text_files.len() + media_records.len(), text_files.len(), media_records.len());
    let media_names: HashSet<String> = media_records.iter().map(|r| r.name.clone()).collect();

    // 2. Download transcript contents and extract individual messages.
    let downloads = download_all(drive, &text_files, cancel)?;
    let mut per_file: Vec<(FileRecord, Vec<Message>)> = vec![];
    for (file_idx, (record, bytes)) in text_files.into_iter().zip(downloads).enumerate() {
        let Some(bytes) = bytes else {
            skipped_file_count += 1;
            continue;
        };
        let blob = String::from_utf8_lossy(&bytes);
        match parse_transcript(&blob, &record.name, &media_names, file_idx, drive_id, anonymizer) {
            Ok(msgs) => per_file.push((record, msgs)),
            Err(e) if matches!(IngestError::of(&e), Some(IngestError::ParseError(_))) => {
                log::warn!("Skipping unparseable transcript {}: {e:#}", record.name);
                skipped_file_count += 1;
            }
            Err(e) => return Err(e),
        }
        // The raw buffer is dropped here; only parsed messages travel on.
    }
    let parsed_count: usize = per_file.iter().map(|(_, msgs)| msgs.len()).sum();
    let media_msg_count = per_file.iter().flat_map(|(_, msgs)| msgs).filter(|m| m.has_media).count();
    log::info!("Processed {parsed_count} msgs ({} text, {media_msg_count} media)",
               parsed_count - media_msg_count);

    // 3. Media linking happens before any merging, since media annotations
    //    participate in the merge winner choice.
    let media_files = media_records.into_iter()
        .map(|r| MediaFile::new(r.id, r.name, r.mime_type))
        .collect_vec();
    let mut retained = media::filter_superfluous_media_files(
        media_files, per_file.iter().flat_map(|(_, msgs)| msgs.iter()));
    if options.skip_media {
        log::warn!("Skipping download of {} media files", retained.len());
        retained.clear();
    } else if !retained.is_empty() {
        log::info!("Downloading {} media files", retained.len());
        let records = retained.iter()
            .map(|f| FileRecord { id: f.id.clone(), name: f.name.clone(), mime_type: f.mime_type.clone() })
            .collect_vec();
        let contents = download_all(drive, &records, cancel)?;
        let mut downloaded = vec![];
        for (mut file, content) in retained.into_iter().zip(contents) {
            match content {
                Some(content) => {
                    file.content = content;
                    media::set_media_hash(&mut file);
                    downloaded.push(file);
                }
                None => skipped_file_count += 1,
            }
        }
        retained = downloaded;
        media::annotate_media_msgs(
            per_file.iter_mut().flat_map(|(_, msgs)| msgs.iter_mut()), &retained);
    }

    // 4. Merge overlapping exports into canonical per-conversation sequences.
    let all_msgs = per_file.iter().flat_map(|(_, msgs)| msgs.iter().cloned()).collect_vec();
    let merge_outcome = merger::merge_all(all_msgs)?;
    let merged_msg_count = merge_outcome.msgs.len();

    // 5. Reconcile against what the store already holds.
    let keys = merge_outcome.msgs.iter().map(|m| m.conversation_key()).unique().collect_vec();
    let persisted = store.fetch_persisted(&keys)?;
    if !persisted.is_empty() {
        log::warn!("Not overwriting {} msgs already in the store", persisted.len());
    }
    let to_insert = reconciler::reconcile_all(merge_outcome.msgs, persisted)?;

    // 6. Persist messages and the per-transcript records.
    cancel.ensure_live()?;
    store.insert_messages(&to_insert)?;
    let scrape_datetime = Local::now().naive_local();
    for (record, msgs) in per_file {
        let scrape_record =
            ScrapeRecord::new(SourceType::GoogleDrive, drive_id, msgs, scrape_datetime, anonymizer)?;
        if store.scrape_hash_exists(&scrape_record.msgs_hash)? {
            log::warn!("Transcript {} is already persisted, skipping its record", record.name);
            continue;
        }
        store.insert_scrape_record(&scrape_record)?;
    }

    // 7. Upload media; each buffer is dropped once stored.
    let media_file_count = retained.len();
    for file in retained {
        cancel.ensure_live()?;
        let key = file.hash.as_ref().expect("Retained media file without a hash");
        match with_retries(&format!("Uploading {}", file.name), REMOTE_ATTEMPTS,
                           || media_sink.store_media(key, &file.mime_type, &file.content)) {
            Ok(()) => log::info!("Uploaded {}", file.name),
            Err(e) => {
                log::warn!("Skipping media upload of {}: {e:#}", file.name);
                skipped_file_count += 1;
            }
        }
    }

    if skipped_file_count > 0 {
        log::warn!("Run finished with {skipped_file_count} skipped files");
    }
    Ok(IngestOutcome {
        merged_msg_count,
        inserted_msg_count: to_insert.len(),
        media_file_count,
        skipped_file_count,
        total_groups: merge_outcome.total_groups,
        failed_groups: merge_outcome.failed_groups,
    })
}

/// Fans file downloads out over a small worker pool. Returns buffers aligned
/// with the input records; a file whose retries are exhausted yields `None`.
/// Cancellation aborts the whole fan-out.
fn download_all(drive: &DriveClient,
                records: &[FileRecord],
                cancel: &CancelToken) -> Result<Vec<Option<Vec<u8>>>> {
    let results: Vec<Mutex<Option<Vec<u8>>>> = records.iter().map(|_| Mutex::new(None)).collect();
    let next_idx = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..DOWNLOAD_WORKERS.min(records.len()) {
            scope.spawn(|| loop {
                if cancel.is_cancelled() {
                    break;
                }
                let idx = next_idx.fetch_add(1, Ordering::SeqCst);
                let Some(record) = records.get(idx) else { break };
                let downloaded = with_retries(&format!("Downloading {}", record.name), REMOTE_ATTEMPTS, || {
                    cancel.ensure_live()?;
                    drive.download(&record.id)
                });
                match downloaded {
                    Ok(bytes) => *results[idx].lock().unwrap() = Some(bytes),
                    Err(e) => log::warn!("Skipping {}: {e:#}", record.name),
                }
            });
        }
    });

    cancel.ensure_live()?;
    Ok(results.into_iter().map(|m| m.into_inner().unwrap()).collect())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::dao::InMemoryStore;
    use crate::test_utils::*;

    use super::*;

    const IMG_W0_HASH: &str = "7acb2c8524b364c3192c5ce86ae29a6a289fb98e843c6a637e710a96e535011a";

    /// Serves a fixed listing plus per-record contents, drive-API style.
    struct FakeDrive {
        listing: serde_json::Value,
        contents: HashMap<&'static str, Vec<u8>>,
    }

    impl HttpClient for FakeDrive {
        fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
            if let Some(rest) = url.strip_prefix("https://www.googleapis.com/drive/v3/files/") {
                let id = rest.split('?').next().unwrap();
                self.contents.get(id).cloned()
                    .ok_or_else(|| anyhow!("no content for {id}"))
            } else {
                Ok(serde_json::to_vec(&self.listing)?)
            }
        }
    }

    fn test_drive_dump() -> FakeDrive {
        FakeDrive {
            listing: serde_json::json!({
                "files": [
                    {"id": "t0", "name": TEST_GROUP_NAME, "mimeType": "text/plain"},
                    {"id": "m0", "name": "IMG-W0.jpg", "mimeType": "image/jpeg"},
                    {"id": "m2", "name": "IMG-W2.jpg", "mimeType": "image/jpeg"},
                ],
            }),
            contents: HashMap::from([
                ("t0", TEST_TRANSCRIPT_F0.as_bytes().to_vec()),
                ("m0", b"abase64encodedimage".to_vec()),
                ("m2", b"abase64encodedimage2".to_vec()),
            ]),
        }
    }

    fn run_ingest(http_client: &dyn HttpClient,
                  store: &mut InMemoryStore,
                  skip_media: bool) -> Result<IngestOutcome> {
        let drive = DriveClient::new(http_client, "key".to_owned());
        let anonymizer = test_anonymizer();
        let mut media_sink = InMemoryStore::default();
        let outcome = ingest(&drive, store, &mut media_sink, &anonymizer, TEST_SOURCE_LOC,
                             &IngestOptions { skip_media }, &CancelToken::new())?;
        store.media = media_sink.media;
        Ok(outcome)
    }

    #[test]
    fn end_to_end_over_a_fake_dump() -> EmptyRes {
        let fake = test_drive_dump();
        let mut store = InMemoryStore::default();
        let outcome = run_ingest(&fake, &mut store, false)?;

        assert_eq!(outcome.merged_msg_count, 7);
        assert_eq!(outcome.inserted_msg_count, 7);
        assert_eq!(outcome.skipped_file_count, 0);
        assert_eq!(outcome.total_groups, 1);
        assert_eq!(outcome.failed_groups, 0);
        assert!(!outcome.all_conversations_failed());

        assert_eq!(store.msgs.len(), 7);
        let media_msg = &store.msgs[1];
        assert_eq!(media_msg.content, "IMG-W0.jpg (file attached)");
        assert!(media_msg.has_media);
        assert_eq!(media_msg.media_upload_loc.as_deref(), Some(IMG_W0_HASH));
        assert_eq!(media_msg.media_mime_type.as_deref(), Some("image/jpeg"));

        // The unreferenced IMG-W2.jpg was dropped, the referenced one stored by hash.
        assert_eq!(outcome.media_file_count, 1);
        assert_eq!(store.media.keys().collect_vec(), vec![IMG_W0_HASH]);

        assert_eq!(store.scrape_records.len(), 1);
        assert_eq!(store.scrape_records[0].source, "GOOGLE_DRIVE");
        assert_eq!(store.scrape_records[0].msgs.len(), 7);
        Ok(())
    }

    #[test]
    fn second_run_inserts_nothing_new() -> EmptyRes {
        let fake = test_drive_dump();
        let mut store = InMemoryStore::default();
        run_ingest(&fake, &mut store, false)?;

        let outcome = run_ingest(&fake, &mut store, false)?;
        assert_eq!(outcome.inserted_msg_count, 0);
        assert_eq!(store.msgs.len(), 7);
        // The per-transcript record is deduplicated by its hash.
        assert_eq!(store.scrape_records.len(), 1);
        Ok(())
    }

    #[test]
    fn skip_media_leaves_annotations_empty() -> EmptyRes {
        let fake = test_drive_dump();
        let mut store = InMemoryStore::default();
        let outcome = run_ingest(&fake, &mut store, true)?;

        assert_eq!(outcome.media_file_count, 0);
        assert!(store.media.is_empty());
        // The message still knows it referenced a media file.
        assert!(store.msgs[1].has_media);
        assert_eq!(store.msgs[1].media_upload_loc, None);
        Ok(())
    }

    #[test]
    fn empty_listing_is_invalid_input() {
        let fake = FakeDrive {
            listing: serde_json::json!({"files": []}),
            contents: HashMap::new(),
        };
        let mut store = InMemoryStore::default();
        let err = run_ingest(&fake, &mut store, false).unwrap_err();
        assert!(matches!(IngestError::of(&err), Some(IngestError::InvalidInput(_))), "{err:#}");
    }

    #[test]
    fn cancellation_aborts_before_downloads() {
        let fake = test_drive_dump();
        let drive = DriveClient::new(&fake, "key".to_owned());
        let mut store = InMemoryStore::default();
        let mut media_sink = InMemoryStore::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let res = ingest(&drive, &mut store, &mut media_sink, &test_anonymizer(), TEST_SOURCE_LOC,
                         &IngestOptions { skip_media: false }, &cancel);
        assert!(res.is_err());
        assert!(store.msgs.is_empty());
    }
}
