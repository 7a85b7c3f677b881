use std::fmt::{Display, Formatter};

use chrono::NaiveDateTime;
use derive_deref::Deref;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MSG_DELETED: &str = "This message was deleted";
pub const MEDIA_OMITTED: &str = "<Media omitted>";

/// Content strings treated as non-original, i.e. not carrying the message's
/// actual text anymore.
pub const DELETED_SENTINELS: [&str; 2] = [MSG_DELETED, MEDIA_OMITTED];

/// Two records within this many seconds of each other may be the same logical
/// message (exports round timestamps differently).
pub const DOMAIN_EQ_TOLERANCE_SECS: i64 = 120;

lazy_static! {
    pub static ref FILE_ATTACHED_REGEX: Regex = Regex::new(r"^(?P<fn>.+?) \(file attached\)$").unwrap();
}

/// Anonymized conversation title.
#[derive(Deref, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub String);

/// Anonymized sender identifier, salted per group.
#[derive(Deref, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SenderId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "GOOGLE_DRIVE")]
    GoogleDrive,
}

impl SourceType {
    pub fn label(&self) -> &'static str {
        match self {
            SourceType::GoogleDrive => "GOOGLE_DRIVE",
        }
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Sequences are grouped by this key before merging.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    pub source_type: SourceType,
    pub source_loc: String,
    pub group_id: GroupId,
}

/// A single normalized chat message.
///
/// Serialized field names and order follow the storage contract; `file_idx`
/// and `file_datetime` are in-run provenance and never leave the process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "datetime")]
    pub dt: NaiveDateTime,
    pub source_type: SourceType,
    pub source_loc: String,
    pub sender_id: SenderId,
    pub group_id: GroupId,
    pub content: String,
    pub order: usize,
    pub has_media: bool,
    pub media_upload_loc: Option<String>,
    pub media_mime_type: Option<String>,
    #[serde(skip)]
    pub file_idx: usize,
    #[serde(skip)]
    pub file_datetime: Option<NaiveDateTime>,
}

impl Message {
    pub fn new(dt: NaiveDateTime,
               sender_id: SenderId,
               group_id: GroupId,
               source_type: SourceType,
               source_loc: String,
               content: String,
               file_idx: usize) -> Self {
        Message {
            dt,
            source_type,
            source_loc,
            sender_id,
            group_id,
            content,
            order: 0,
            has_media: false,
            media_upload_loc: None,
            media_mime_type: None,
            file_idx,
            file_datetime: None,
        }
    }

    pub fn is_original(&self) -> bool {
        !DELETED_SENTINELS.contains(&self.content.as_str())
    }

    /// Filename referenced by a `<name> (file attached)` body, if any.
    pub fn attached_file_name(&self) -> Option<&str> {
        FILE_ATTACHED_REGEX.captures(&self.content)
            .map(|c| c.name("fn").unwrap().as_str())
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey {
            source_type: self.source_type,
            source_loc: self.source_loc.clone(),
            group_id: self.group_id.clone(),
        }
    }

    /// Sort key for merge preprocessing: earliest first, then assigned order,
    /// deletion sentinels last among ties.
    pub fn msg_sort_key(&self) -> (NaiveDateTime, usize, bool) {
        (self.dt, self.order, !self.is_original())
    }

    /// Representation quality, higher is better. Drives the winner choice when
    /// two records of the same logical message are merged.
    pub fn content_rank(&self) -> (bool, bool, bool, bool) {
        (self.is_original(),
         self.has_media,
         self.media_upload_loc.is_some(),
         self.attached_file_name().is_some())
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let content_start: String = self.content.chars().take(50).collect();
        write!(f, "{}: {} {}: {}",
               self.order, self.dt, &self.sender_id.chars().take(5).collect::<String>(),
               content_start.replace('\n', "\\n"))
    }
}

/// Domain equivalence, as opposed to structural `PartialEq`: two records
/// represent the same logical message when group, sender and content coincide
/// and their timestamps are within [`DOMAIN_EQ_TOLERANCE_SECS`].
pub trait PracticalEq<Rhs: ?Sized = Self> {
    fn practically_equals(&self, other: &Rhs) -> bool;
}

impl PracticalEq for Message {
    fn practically_equals(&self, other: &Self) -> bool {
        self.group_id == other.group_id
            && self.sender_id == other.sender_id
            && self.content == other.content
            && (self.dt - other.dt).num_seconds().abs() <= DOMAIN_EQ_TOLERANCE_SECS
    }
}

impl PracticalEq for [Message] {
    fn practically_equals(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.iter().zip(other.iter()).all(|(a, b)| a.practically_equals(b))
    }
}

/// A loose media file from the export, matched to messages by name.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
    pub hash: Option<String>,
}

impl MediaFile {
    pub fn new(id: String, name: String, mime_type: String) -> Self {
        MediaFile { id, name, mime_type, content: vec![], hash: None }
    }
}
