use itertools::{Either, Itertools};

use crate::drive::FileRecord;

pub mod whatsapp_text;

pub const TRANSCRIPT_NAME_PREFIX: &str = "WhatsApp Chat with ";
pub const TRANSCRIPT_MIME_TYPE: &str = "text/plain";

/// A record is a transcript when both the mime type and the name prefix say so;
/// everything else in the dump is treated as media.
pub fn is_transcript(record: &FileRecord) -> bool {
    record.mime_type == TRANSCRIPT_MIME_TYPE && record.name.starts_with(TRANSCRIPT_NAME_PREFIX)
}

pub fn split_records(records: Vec<FileRecord>) -> (Vec<FileRecord>, Vec<FileRecord>) {
    records.into_iter().partition_map(|r| {
        if is_transcript(&r) { Either::Left(r) } else { Either::Right(r) }
    })
}
