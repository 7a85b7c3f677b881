use chrono::NaiveDateTime;

use crate::loader::whatsapp_text::parse_transcript;
use crate::prelude::*;

pub const TEST_GROUP_NAME: &str = "WhatsApp Chat with test";
pub const TEST_SOURCE_LOC: &str = "folder0";
pub const TEST_SALT: &str = "pepper";

pub const TEST_TRANSCRIPT_F0: &str = "\
28/07/20, 7:18 pm - Messages to this group are now secured with end-to-end encryption. Tap for more info.
14/07/20, 11:14 pm - +91 12345 12345 created group \"test group\"
28/07/20, 7:18 pm - You joined using this group's invite link
28/07/20, 7:30 pm - +91 12345 54321 joined using this group's invite link
28/07/20, 7:35 pm - +91 12345 54321: Hi
28/07/20, 7:35 pm - +91 12345 54321: IMG-W0.jpg (file attached)
28/07/20, 7:35 pm - +91 12345 54321: IMG-W1.jpg (file attached)
28/07/20, 7:35 pm - +91 12345 12345: Neat photo
28/07/20, 7:50 pm - +91 12345 54321: Yea
Let me write
Three lines
28/07/20, 7:51 pm - +91 12345 12345: Call me
28/07/20, 7:52 pm - +91 12345 54321: OK
28/07/20, 7:53 pm - +91 12345 12345 left
";

/// Re-export of the same conversation, overlapping the tail of F0.
pub const TEST_TRANSCRIPT_F1: &str = "\
28/07/20, 7:50 pm - +91 12345 54321: Yea
Let me write
Three lines
28/07/20, 7:51 pm - +91 12345 12345: Call me
28/07/20, 7:52 pm - +91 12345 54321: OK
28/07/20, 8:31 pm - +91 12345 12345 left
28/07/20, 8:51 pm - +91 12345 54321: Where did you go?
";

/// Later export with a time gap against F0.
pub const TEST_TRANSCRIPT_F2: &str = "\
28/07/20, 8:51 pm - +91 12345 54321: Where did you go?
28/07/20, 8:52 pm - +91 12345 54321 left
28/07/20, 9:30 pm - +91 12345 12345 joined using this group's invite link
28/07/20, 9:30 pm - +91 12345 12345: Back
";

pub fn test_anonymizer() -> Anonymizer {
    Anonymizer::new(TEST_SALT.to_owned()).unwrap()
}

pub fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

pub fn new_msg(group: &str, sender: &str, content: &str,
               dt: NaiveDateTime, order: usize, file_idx: usize) -> Message {
    let mut msg = Message::new(
        dt,
        SenderId(sender.to_owned()),
        GroupId(group.to_owned()),
        SourceType::GoogleDrive,
        TEST_SOURCE_LOC.to_owned(),
        content.to_owned(),
        file_idx,
    );
    msg.order = order;
    msg
}

pub fn parse_test_transcript(blob: &str, file_idx: usize) -> Result<Vec<Message>> {
    parse_transcript(blob, TEST_GROUP_NAME, &HashSet::new(),
                     file_idx, TEST_SOURCE_LOC, &test_anonymizer())
}

/// Structural comparison form: `file_idx` and `file_datetime` are in-run
/// provenance and excluded, same as in persisted output.
pub fn serialized(msgs: &[Message]) -> serde_json::Value {
    serde_json::to_value(msgs).unwrap()
}
