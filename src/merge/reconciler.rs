use itertools::Itertools;

use crate::merge::merger::{group_msgs, merge_two_sequences};
use crate::prelude::*;

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;

/// Compares freshly merged sequences against what the document store already
/// holds and keeps only the messages that still need inserting. Conversations
/// the store has never seen pass through unchanged; a conversation that cannot
/// be aligned with its persisted prefix is skipped with an error log.
pub fn reconcile_all(local: Vec<Message>, persisted: Vec<Message>) -> Result<Vec<Message>> {
    if persisted.is_empty() {
        return Ok(local);
    }
    let persisted_by_group = group_msgs(persisted);
    let mut ret = vec![];
    for (key, local_in_group) in group_msgs(local) {
        match persisted_by_group.get(&key) {
            None => ret.extend(local_in_group),
            Some(persisted_in_group) => {
                match reconcile_group(persisted_in_group.clone(), local_in_group) {
                    Ok(tail) => ret.extend(tail),
                    Err(e) if matches!(IngestError::of(&e), Some(IngestError::NoOverlap)) => {
                        log::error!("Skipping conversation {}: {e:#}", *key.group_id);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Ok(ret)
}

/// One conversation: pairwise-merge (persisted, local), require the persisted
/// prefix to survive verbatim, and emit only the tail. Emitted messages
/// continue the persisted `order` numbering.
pub fn reconcile_group(persisted: Vec<Message>, local: Vec<Message>) -> Result<Vec<Message>> {
    require!(!persisted.is_empty() && !local.is_empty(),
             "Cannot reconcile an empty sequence");
    if persisted[0].dt > local[0].dt {
        bail!(IngestError::IntegrityViolation(
            "persisted sequence starts after the local one".to_owned()));
    }

    let persisted_len = persisted.len();
    let next_order = persisted.iter().map(|m| m.order).max().unwrap() + 1;

    let merged = merge_two_sequences(persisted.clone(), local)?;
    if !merged[..persisted_len].practically_equals(&persisted[..]) {
        bail!(IngestError::IntegrityViolation(
            "merge did not preserve the persisted prefix".to_owned()));
    }

    Ok(merged.into_iter().skip(persisted_len)
        .enumerate()
        .map(|(i, mut msg)| {
            msg.order = next_order + i;
            msg
        })
        .collect_vec())
}
