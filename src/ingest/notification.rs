use chrono::{DateTime, Utc};

/// Kind of media carried by a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Photo (largest size is saved)
    Photo,
    /// Video
    Video,
    /// GIF / animation
    Animation,
    /// Image or video sent as a file
    Document,
}

impl MediaKind {
    /// Short label for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Animation => "animation",
            Self::Document => "document",
        }
    }
}

/// One incoming media reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaNotification {
    /// Conversation the media arrived in
    pub chat_id: i64,
    /// Transport message id, used to anchor the reply
    pub message_id: i32,
    /// Album identifier; `None` for standalone items
    pub album_id: Option<String>,
    /// Backend file reference
    pub file_ref: String,
    /// Original file name when the client sent one
    pub file_name: Option<String>,
    /// Kind of media
    pub kind: MediaKind,
    /// When the notification was received
    pub received_at: DateTime<Utc>,
}

impl MediaNotification {
    /// Aggregation key, if the notification belongs to an album
    #[must_use]
    pub fn album_key(&self) -> Option<AlbumKey> {
        self.album_id.as_ref().map(|album_id| AlbumKey {
            chat_id: self.chat_id,
            album_id: album_id.clone(),
        })
    }
}

/// Key of an album aggregation: albums are scoped to their conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlbumKey {
    /// Conversation id
    pub chat_id: i64,
    /// Album identifier
    pub album_id: String,
}

impl std::fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.album_id)
    }
}

/// How a batch came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrigin {
    /// A notification without album id
    Standalone,
    /// A completed album
    Album,
    /// A notification that arrived after its album was finalized
    Orphan,
}

/// Finalized, immutable set of items processed and replied to as a unit
#[derive(Debug, Clone)]
pub struct Batch {
    /// Conversation the batch belongs to
    pub chat_id: i64,
    /// Album identifier, if any
    pub album_id: Option<String>,
    /// Items in arrival order
    pub items: Vec<MediaNotification>,
    /// How the batch was formed
    pub origin: BatchOrigin,
}

impl Batch {
    /// One-element batch for a standalone or orphan notification
    #[must_use]
    pub fn single(notification: MediaNotification, origin: BatchOrigin) -> Self {
        Self {
            chat_id: notification.chat_id,
            album_id: notification.album_id.clone(),
            items: vec![notification],
            origin,
        }
    }

    /// Message the summary reply is anchored to (the latest item)
    #[must_use]
    pub fn reply_anchor(&self) -> Option<i32> {
        self.items.last().map(|n| n.message_id)
    }
}

#[cfg(test)]
pub(crate) fn sample(chat_id: i64, message_id: i32, album_id: Option<&str>) -> MediaNotification {
    MediaNotification {
        chat_id,
        message_id,
        album_id: album_id.map(str::to_string),
        file_ref: format!("file-{message_id}"),
        file_name: None,
        kind: MediaKind::Photo,
        received_at: Utc::now(),
    }
}
