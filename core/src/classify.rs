use super::model::{DocumentAttribute, Media};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Photo,
    Video,
    Voice,
    Music,
    Animated,
    Sticker,
    File,
    Poll,
    Contact,
    None,
}

impl ContentKind {
    pub fn label(self) -> &'static str {
        match self {
            ContentKind::Photo => "photo",
            ContentKind::Video => "video",
            ContentKind::Voice => "voice",
            ContentKind::Music => "music",
            ContentKind::Animated => "gif",
            ContentKind::Sticker => "sticker",
            ContentKind::File => "file",
            ContentKind::Poll => "poll",
            ContentKind::Contact => "contact",
            ContentKind::None => "text",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn classify(media: Option<&Media>) -> ContentKind {
    match media {
        Some(Media::Photo) => ContentKind::Photo,
        Some(Media::Document(doc)) => classify_document(&doc.attributes),
        Some(Media::Poll(_)) => ContentKind::Poll,
        Some(Media::Contact(_)) => ContentKind::Contact,
        Some(Media::WebPage) | None => ContentKind::None,
    }
}

/// 文档属性并不互斥（例如动图同时带有 Video 与 Animated），以列表中首个命中的属性为准
pub fn classify_document(attributes: &[DocumentAttribute]) -> ContentKind {
    attributes
        .iter()
        .find_map(|attr| match attr {
            DocumentAttribute::Video => Some(ContentKind::Video),
            DocumentAttribute::Audio { voice: true } => Some(ContentKind::Voice),
            DocumentAttribute::Audio { voice: false } => Some(ContentKind::Music),
            DocumentAttribute::Sticker => Some(ContentKind::Sticker),
            DocumentAttribute::Animated => Some(ContentKind::Animated),
            DocumentAttribute::Other => None,
        })
        .unwrap_or(ContentKind::File)
}
