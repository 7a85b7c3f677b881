use itertools::Itertools;
use sha2::{Digest, Sha256};

use crate::prelude::*;

/// Drops media files not referenced by any media-bearing message.
/// Exports routinely contain such orphans, reason unknown.
pub fn filter_superfluous_media_files<'a>(media_files: Vec<MediaFile>,
                                          msgs: impl Iterator<Item = &'a Message>) -> Vec<MediaFile> {
    let referenced: HashSet<&str> = msgs
        .filter(|m| m.has_media)
        .filter_map(|m| m.attached_file_name())
        .collect();

    let total = media_files.len();
    let retained = media_files.into_iter()
        .filter(|f| referenced.contains(f.name.as_str()))
        .collect_vec();
    if retained.len() < total {
        log::warn!("Dropping {} media files not referenced by any message", total - retained.len());
    }
    retained
}

pub fn set_media_hash(media_file: &mut MediaFile) {
    let digest = Sha256::digest(&media_file.content);
    media_file.hash = Some(to_hex_string(&digest));
}

/// Annotates media-bearing messages with the content hash and mime type of the
/// file their body references. Must run before merging since both fields
/// participate in the merge winner choice.
pub fn annotate_media_msgs<'a>(msgs: impl Iterator<Item = &'a mut Message>, media_files: &[MediaFile]) {
    let by_name: HashMap<&str, &MediaFile> =
        media_files.iter().map(|f| (f.name.as_str(), f)).collect();
    for msg in msgs.filter(|m| m.has_media) {
        let file_name = msg.attached_file_name()
            .expect("Media-bearing message without a file reference");
        if let Some(file) = by_name.get(file_name) {
            msg.media_upload_loc = file.hash.clone();
            msg.media_mime_type = Some(file.mime_type.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::test_utils::*;

    use super::*;

    fn media_file(name: &str, content: &[u8]) -> MediaFile {
        MediaFile {
            id: format!("id-{name}"),
            name: name.to_owned(),
            mime_type: "image/jpeg".to_owned(),
            content: content.to_vec(),
            hash: None,
        }
    }

    fn media_msg(content: &str) -> Message {
        let mut msg = new_msg("g", "s", content, dt("2020-07-28 19:35:00"), 0, 0);
        msg.has_media = true;
        msg
    }

    #[test]
    fn known_content_hash() {
        let mut file = media_file("IMG-W0.jpg", b"abase64encodedimage");
        set_media_hash(&mut file);
        assert_eq!(file.hash.as_deref(),
                   Some("7acb2c8524b364c3192c5ce86ae29a6a289fb98e843c6a637e710a96e535011a"));
    }

    #[test]
    fn unreferenced_files_are_dropped() {
        let files = vec![
            media_file("IMG-W0.jpg", b"abase64encodedimage"),
            media_file("IMG-W2.jpg", b"abase64encodedimage2"),
        ];
        let msgs = vec![
            media_msg("IMG-W0.jpg (file attached)"),
            new_msg("g", "s", "plain text", dt("2020-07-28 19:36:00"), 1, 0),
        ];
        let retained = filter_superfluous_media_files(files, msgs.iter());
        assert_eq!(retained.iter().map(|f| f.name.as_str()).collect_vec(), vec!["IMG-W0.jpg"]);
    }

    #[test]
    fn messages_get_hash_and_mime() {
        let mut file = media_file("IMG-W0.jpg", b"abase64encodedimage");
        set_media_hash(&mut file);

        let mut msgs = vec![
            media_msg("IMG-W0.jpg (file attached)"),
            media_msg("IMG-W9.jpg (file attached)"),
        ];
        annotate_media_msgs(msgs.iter_mut(), &[file]);

        assert_eq!(msgs[0].media_upload_loc.as_deref(),
                   Some("7acb2c8524b364c3192c5ce86ae29a6a289fb98e843c6a637e710a96e535011a"));
        assert_eq!(msgs[0].media_mime_type.as_deref(), Some("image/jpeg"));
        // Referenced file missing from the retained set, nothing to attach.
        assert_eq!(msgs[1].media_upload_loc, None);
        assert_eq!(msgs[1].media_mime_type, None);
    }
}
