use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use const_format::concatcp;
use lazy_static::lazy_static;
use regex::Regex;

use crate::prelude::*;

#[cfg(test)]
#[path = "whatsapp_text_tests.rs"]
mod tests;

const TIMESTAMP_PREFIX: &str = r"^(?P<day>\d+/\d+/\d+), (?P<tm>\d+:\d+(?: am| pm)?)\s*-\s*";

lazy_static! {
    // MSG_LINE is the more specific alternative and must be tried first.
    static ref MSG_LINE_REGEX: Regex =
        Regex::new(concatcp!("(?i)", TIMESTAMP_PREFIX, r"(?P<sn>[^:]+): (?P<tail>.*)$")).unwrap();
    static ref ACTION_LINE_REGEX: Regex =
        Regex::new(concatcp!("(?i)", TIMESTAMP_PREFIX, r"(?P<tail>[^:]+)$")).unwrap();
}

/// Streams one transcript blob into an ordered message sequence.
///
/// Timestamped user lines open a new message, system/action lines are dropped,
/// and anything else continues the current message's body. The post-pass strips
/// bodies, assigns dense in-file `order`, stamps every message with the file's
/// freshness datetime, and flags bodies referencing a known media file.
pub fn parse_transcript(blob: &str,
                        transcript_name: &str,
                        media_names: &HashSet<String>,
                        file_idx: usize,
                        source_loc: &str,
                        anonymizer: &Anonymizer) -> Result<Vec<Message>> {
    let group_id = anonymizer.anonymize_group(transcript_name);

    let mut msgs: Vec<Message> = vec![];
    let mut current: Option<Message> = None;
    for line in blob.lines() {
        if let Some(capture) = MSG_LINE_REGEX.captures(line) {
            if let Some(msg) = current.take() {
                msgs.push(msg);
            }
            let dt = parse_datetime(&capture["day"], &capture["tm"])?;
            let sender = capture["sn"].trim();
            current = Some(Message::new(
                dt,
                anonymizer.anonymize_sender(sender, &group_id),
                group_id.clone(),
                SourceType::GoogleDrive,
                source_loc.to_owned(),
                capture["tail"].to_owned(),
                file_idx,
            ));
        } else if ACTION_LINE_REGEX.is_match(line) {
            // The action line itself produces no message.
            if let Some(msg) = current.take() {
                msgs.push(msg);
            }
        } else if !line.is_empty() {
            // Continuation of a multi-line body; lines before any header are dropped.
            if let Some(msg) = current.as_mut() {
                msg.content.push('\n');
                msg.content.push_str(line);
            }
        }
    }
    if let Some(msg) = current.take() {
        msgs.push(msg);
    }

    if let Some(file_datetime) = msgs.last().map(|m| m.dt) {
        for (i, msg) in msgs.iter_mut().enumerate() {
            msg.order = i;
            msg.content = msg.content.trim().to_owned();
            msg.file_datetime = Some(file_datetime);
            msg.has_media = msg.attached_file_name()
                .map_or(false, |file_name| media_names.contains(file_name));
        }
    }

    log::info!("Processed group {} ({} messages)", *group_id, msgs.len());
    Ok(msgs)
}

/// Datetime formats seen in the wild:
/// ```text
/// 28/07/20, 7:18 pm
/// 30/6/2020, 16:14
/// ```
fn parse_datetime(day: &str, tm: &str) -> Result<NaiveDateTime> {
    const DAY_SHORT_FMT: &str = "%d/%m/%y";
    const DAY_LONG_FMT: &str = "%d/%m/%Y";

    let date = NaiveDate::parse_from_str(day, DAY_SHORT_FMT)
        .or_else(|_| NaiveDate::parse_from_str(day, DAY_LONG_FMT))
        .map_err(|_| IngestError::ParseError(format!("unrecognized day {day:?}")))?;

    let tm = tm.trim();
    let time = if tm.to_ascii_lowercase().ends_with("m") {
        NaiveTime::parse_from_str(&tm.to_ascii_uppercase(), "%I:%M %p")
    } else {
        NaiveTime::parse_from_str(tm, "%H:%M")
    }.map_err(|_| IngestError::ParseError(format!("unrecognized time {tm:?}")))?;

    Ok(NaiveDateTime::new(date, time))
}
