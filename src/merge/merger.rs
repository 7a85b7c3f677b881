use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::Duration;
use itertools::Itertools;

use crate::prelude::*;

#[cfg(test)]
#[path = "merger_tests.rs"]
mod tests;

/// Messages this close in time are paired up when searching for the overlap
/// alignment; exports disagree by up to a minute on the same message.
const OFFSET_SEARCH_WINDOW_SECS: i64 = 60;
/// `check_match` timestamp tolerance, one second above the search window.
const MATCH_DT_TOLERANCE_SECS: i64 = 61;
/// This many accumulated matches settle an offset outright.
const STRONG_MATCH_COUNT: usize = 20;
/// Fewer matches than this never count as overlap, unless they cover half of
/// the shorter sequence.
const MIN_MATCH_COUNT: usize = 3;

pub struct MergeOutcome {
    pub msgs: Vec<Message>,
    pub total_groups: usize,
    pub failed_groups: usize,
}

/// Folds all per-file sequences into one canonical sequence per conversation.
/// A conversation whose files cannot be aligned is dropped with an error log;
/// integrity violations abort.
pub fn merge_all(msgs: Vec<Message>) -> Result<MergeOutcome> {
    measure(|| {
        let by_group = group_msgs(msgs);
        let total_groups = by_group.len();
        let mut failed_groups = 0;
        let mut merged = vec![];
        for (key, group) in by_group {
            match merge_group(group) {
                Ok(msgs_in_group) => merged.extend(msgs_in_group),
                Err(e) if matches!(IngestError::of(&e), Some(IngestError::NoOverlap)) => {
                    log::error!("Skipping conversation {}: {e:#}", *key.group_id);
                    failed_groups += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(MergeOutcome { msgs: merged, total_groups, failed_groups })
    }, |res, t| {
        if let Ok(outcome) = res {
            log::info!("Merged into {} messages in {t} ms", outcome.msgs.len());
        }
    })
}

/// Buckets messages by conversation, each bucket sorted by `msg_sort_key`.
pub fn group_msgs(msgs: Vec<Message>) -> BTreeMap<ConversationKey, Vec<Message>> {
    let mut by_group: BTreeMap<ConversationKey, Vec<Message>> = BTreeMap::new();
    for msg in msgs {
        by_group.entry(msg.conversation_key()).or_default().push(msg);
    }
    for group in by_group.values_mut() {
        group.sort_by_key(|m| m.msg_sort_key());
    }
    by_group
}

/// Merges all sequences of one conversation, however many files it came from.
pub fn merge_group(msgs: Vec<Message>) -> Result<Vec<Message>> {
    require!(msgs.iter().map(|m| &m.group_id).all_equal(),
             "Cannot merge messages from different groups");

    let original_content: HashSet<String> =
        msgs.iter().filter(|m| m.is_original()).map(|m| m.content.clone()).collect();

    let mut msgs = msgs;
    msgs.sort_by_key(|m| m.msg_sort_key());

    // Bucket by source file, preserving first-seen order.
    let mut buckets: Vec<Vec<Message>> = vec![];
    let mut bucket_by_file: HashMap<usize, usize> = HashMap::new();
    for msg in msgs {
        let idx = *bucket_by_file.entry(msg.file_idx).or_insert_with(|| {
            buckets.push(vec![]);
            buckets.len() - 1
        });
        buckets[idx].push(msg);
    }

    let num_files = buckets.len();
    if num_files == 1 {
        let single = buckets.pop().unwrap();
        assert_order_density(&single)?;
        return Ok(single);
    }

    log::info!("Merging {num_files} files...");
    let input_len: usize = buckets.iter().map(|b| b.len()).sum();
    let mut ret = buckets.pop().unwrap();
    while let Some(other) = buckets.pop() {
        ret = merge_two_sequences(ret, other)?;
    }

    let merged_content: HashSet<&str> =
        ret.iter().filter(|m| m.is_original()).map(|m| m.content.as_str()).collect();
    let missed = original_content.iter()
        .filter(|c| !merged_content.contains(c.as_str()))
        .collect_vec();
    if !missed.is_empty() {
        bail!(IngestError::IntegrityViolation(format!("content lost in merge: {missed:?}")));
    }
    assert_order_density(&ret)?;

    log::info!("Merged {} files with an avg of {} messages to {} messages",
               num_files, input_len / num_files, ret.len());
    Ok(ret)
}

/// Merges two sorted sequences of the same conversation into one, each logical
/// message appearing exactly once, with fresh dense `order`.
pub fn merge_two_sequences(mut msgs_a: Vec<Message>, mut msgs_b: Vec<Message>) -> Result<Vec<Message>> {
    require!(!msgs_a.is_empty() && !msgs_b.is_empty(), "Cannot merge an empty sequence");

    // The code ahead assumes A starts no later than B.
    if msgs_a[0].dt > msgs_b[0].dt {
        std::mem::swap(&mut msgs_a, &mut msgs_b);
    }

    let mut merged = if msgs_a.last().unwrap().dt < msgs_b[0].dt {
        // No overlap in time, plain concatenation.
        msgs_a.extend(msgs_b);
        msgs_a
    } else {
        let offset = find_offset(&msgs_a, &msgs_b)?;
        merge_given_offset(&msgs_a, &msgs_b, offset)
    };
    for (i, msg) in merged.iter_mut().enumerate() {
        msg.order = i;
    }
    Ok(merged)
}

enum MatchScore {
    /// Enough accumulated matches to settle the offset outright.
    Strong,
    Partial(usize),
    NoMatch,
}

/// Scores how well aligning index `i` of B with `i + offset` of A explains the
/// two sequences. Any sender or timestamp disagreement on an aligned pair
/// disqualifies the offset; content is only compared when both sides still
/// carry their original body.
fn check_match(msgs_a: &[Message], msgs_b: &[Message], offset: i64) -> MatchScore {
    let mut matches = 0_usize;
    for i in -offset..(msgs_a.len() + msgs_b.len()) as i64 {
        let msg_a = match usize::try_from(i + offset).ok().and_then(|idx| msgs_a.get(idx)) {
            Some(m) => m,
            None => continue,
        };
        let msg_b = match usize::try_from(i).ok().and_then(|idx| msgs_b.get(idx)) {
            Some(m) => m,
            None => continue,
        };

        if msg_a.sender_id != msg_b.sender_id {
            return MatchScore::NoMatch;
        }
        if (msg_a.dt - msg_b.dt).num_seconds().abs() > MATCH_DT_TOLERANCE_SECS {
            return MatchScore::NoMatch;
        }
        if !msg_a.is_original() || !msg_b.is_original() {
            continue;
        }
        if msg_a.content != msg_b.content {
            return MatchScore::NoMatch;
        }

        matches += 1;
        if matches >= STRONG_MATCH_COUNT {
            return MatchScore::Strong;
        }
    }
    let alt_min_match_len = msgs_a.len().min(msgs_b.len()) / 2;
    if matches >= MIN_MATCH_COUNT || (matches > 0 && matches >= alt_min_match_len) {
        MatchScore::Partial(matches)
    } else {
        MatchScore::NoMatch
    }
}

/// Finds the offset aligning B against A. Candidates come from message pairs
/// close in time near the start of B; since B is sorted, its scan can stop
/// once it falls more than the window behind A.
fn find_offset(msgs_a: &[Message], msgs_b: &[Message]) -> Result<i64> {
    let window = Duration::seconds(OFFSET_SEARCH_WINDOW_SECS);
    let mut checked_offsets: HashSet<i64> = HashSet::new();
    let mut possible_matches: HashMap<i64, usize> = HashMap::new();
    for msg_a in msgs_a {
        if msgs_b[0].dt - msg_a.dt > window {
            continue;
        }
        for msg_b in msgs_b {
            if msg_b.dt - msg_a.dt > window {
                continue;
            }
            if msg_a.dt - msg_b.dt > window {
                break;
            }
            let offset = msg_a.order as i64 - msg_b.order as i64;
            if !checked_offsets.insert(offset) {
                continue;
            }
            match check_match(msgs_a, msgs_b, offset) {
                MatchScore::Strong => return Ok(offset),
                MatchScore::Partial(score) => {
                    possible_matches.insert(offset, score);
                }
                MatchScore::NoMatch => {}
            }
        }
    }
    possible_matches.into_iter()
        .max_by_key(|&(offset, score)| (score, Reverse(offset)))
        .map(|(offset, _)| offset)
        .ok_or_else(|| anyhow!(IngestError::NoOverlap))
}

/// Walks both sequences at the given alignment, emitting unmatched messages
/// as-is and collapsing aligned pairs into their better representation.
fn merge_given_offset(msgs_a: &[Message], msgs_b: &[Message], offset: i64) -> Vec<Message> {
    let mut merged = vec![];
    let mut i = -offset;
    loop {
        let msg_a = usize::try_from(i + offset).ok().and_then(|idx| msgs_a.get(idx));
        let msg_b = usize::try_from(i).ok().and_then(|idx| msgs_b.get(idx));
        match (msg_a, msg_b) {
            (Some(msg_a), Some(msg_b)) => merged.push(merge_pair(msg_a, msg_b)),
            (Some(msg_a), None) => merged.push(msg_a.clone()),
            (None, Some(msg_b)) => merged.push(msg_b.clone()),
            (None, None) => break,
        }
        i += 1;
    }
    merged
}

/// Collapses two records of the same logical message. The higher-ranked record
/// wins wholesale: a later export often fills in a media upload an earlier one
/// lacked, while a deletion sentinel must not overwrite a preserved original.
/// On equal rank the earlier sequence's record is kept.
fn merge_pair(msg_a: &Message, msg_b: &Message) -> Message {
    assert_eq!(msg_a.sender_id, msg_b.sender_id);
    assert_eq!(msg_a.group_id, msg_b.group_id);
    if msg_b.content_rank() > msg_a.content_rank() {
        msg_b.clone()
    } else {
        msg_a.clone()
    }
}

pub fn assert_order_density(msgs: &[Message]) -> EmptyRes {
    let dense = msgs.iter().map(|m| m.order).sorted().eq(0..msgs.len());
    if !dense {
        bail!(IngestError::IntegrityViolation("message order is not a dense 0-based range".to_owned()));
    }
    Ok(())
}
