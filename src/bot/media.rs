//! Extraction of saveable media from incoming Telegram messages.

use crate::ingest::{MediaKind, MediaNotification};
use teloxide::types::Message;

/// Whether a document MIME type is an image or a video
#[must_use]
pub fn is_saveable_mime(mime: &str) -> bool {
    let mime = mime.trim().to_ascii_lowercase();
    mime.starts_with("image/") || mime.starts_with("video/")
}

/// Whether the message carries something the bot saves
#[must_use]
pub fn has_saveable_media(msg: &Message) -> bool {
    to_notification(msg).is_some()
}

/// Turn a message into a [`MediaNotification`].
///
/// Photos use the largest available size. Documents are only accepted with an
/// image or video MIME type. Returns `None` for anything else.
#[must_use]
pub fn to_notification(msg: &Message) -> Option<MediaNotification> {
    let (file_ref, file_name, kind) = if let Some(sizes) = msg.photo() {
        let largest = sizes.last()?;
        (largest.file.id.to_string(), None, MediaKind::Photo)
    } else if let Some(video) = msg.video() {
        (
            video.file.id.to_string(),
            video.file_name.clone(),
            MediaKind::Video,
        )
    } else if let Some(animation) = msg.animation() {
        (
            animation.file.id.to_string(),
            animation.file_name.clone(),
            MediaKind::Animation,
        )
    } else if let Some(doc) = msg.document() {
        let saveable = doc
            .mime_type
            .as_ref()
            .is_some_and(|m| is_saveable_mime(m.essence_str()));
        if !saveable {
            return None;
        }
        (
            doc.file.id.to_string(),
            doc.file_name.clone(),
            MediaKind::Document,
        )
    } else {
        return None;
    };

    Some(MediaNotification {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        album_id: msg.media_group_id().map(ToString::to_string),
        file_ref,
        file_name,
        kind,
        received_at: msg.date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(extra: serde_json::Value) -> Message {
        let mut base = json!({
            "message_id": 17,
            "date": 1_700_000_000,
            "chat": { "id": 42, "type": "private", "first_name": "Ann" },
            "from": { "id": 42, "is_bot": false, "first_name": "Ann" }
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(base).expect("valid message json")
    }

    #[test]
    fn test_mime_filter() {
        assert!(is_saveable_mime("image/png"));
        assert!(is_saveable_mime("video/mp4"));
        assert!(is_saveable_mime("Image/JPEG"));
        assert!(!is_saveable_mime("application/pdf"));
        assert!(!is_saveable_mime("text/plain"));
    }

    #[test]
    fn test_photo_uses_largest_size_and_album_id() {
        let msg = message(json!({
            "media_group_id": "album-9",
            "photo": [
                { "file_id": "small", "file_unique_id": "s", "width": 90, "height": 90, "file_size": 1000 },
                { "file_id": "large", "file_unique_id": "l", "width": 1280, "height": 1280, "file_size": 90000 }
            ]
        }));

        let n = to_notification(&msg).expect("photo is saveable");
        assert_eq!(n.file_ref, "large");
        assert_eq!(n.kind, MediaKind::Photo);
        assert_eq!(n.album_id.as_deref(), Some("album-9"));
        assert_eq!(n.chat_id, 42);
        assert_eq!(n.message_id, 17);
        assert!(n.file_name.is_none());
    }

    #[test]
    fn test_image_document_keeps_file_name() {
        let msg = message(json!({
            "document": {
                "file_id": "doc1",
                "file_unique_id": "d1",
                "file_name": "scan.png",
                "mime_type": "image/png",
                "file_size": 2048
            }
        }));

        let n = to_notification(&msg).expect("image document is saveable");
        assert_eq!(n.kind, MediaKind::Document);
        assert_eq!(n.file_name.as_deref(), Some("scan.png"));
        assert!(n.album_id.is_none());
    }

    #[test]
    fn test_other_documents_and_text_ignored() {
        let pdf = message(json!({
            "document": {
                "file_id": "doc2",
                "file_unique_id": "d2",
                "file_name": "report.pdf",
                "mime_type": "application/pdf"
            }
        }));
        assert!(to_notification(&pdf).is_none());

        let text = message(json!({ "text": "hello" }));
        assert!(!has_saveable_media(&text));
    }
}
