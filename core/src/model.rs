use chrono::{DateTime, Utc};

/// 源会话中的一条历史消息，由平台适配层转换而来
#[derive(Debug, Clone)]
pub struct SourceMessage {
    pub id: i32,
    pub date: DateTime<Utc>,
    pub text: String,
    pub entities: Vec<TextEntity>,
    pub media: Option<Media>,
    pub reply_to: Option<i32>,
    pub album_id: Option<i64>,
    pub forward: Option<ForwardOrigin>,
    pub sender: Option<SenderRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderRef {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Media {
    Photo,
    Document(DocumentInfo),
    Poll(Poll),
    Contact(Contact),
    WebPage,
}

impl Media {
    /// 照片与文档需要先下载再重新上传
    pub fn is_downloadable(&self) -> bool {
        matches!(self, Media::Photo | Media::Document(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentInfo {
    pub attributes: Vec<DocumentAttribute>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentAttribute {
    Video,
    Audio { voice: bool },
    Sticker,
    Animated,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Poll {
    pub question: String,
    pub answers: Vec<PollAnswer>,
    pub quiz: bool,
    pub multiple_choice: bool,
    pub public_voters: bool,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollAnswer {
    pub text: String,
    pub option: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub vcard: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKey {
    User(i64),
    Chat(i64),
    Channel(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardOrigin {
    pub sender: Option<PeerKey>,
    pub channel_post: Option<i32>,
    pub from_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Channel,
    Group,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: i64,
    pub title: String,
    pub username: Option<String>,
    pub kind: ChatKind,
}

impl ChatInfo {
    /// 仅公开频道/群组拥有可用于链接的用户名
    pub fn public_handle(&self) -> Option<&str> {
        if self.kind == ChatKind::User {
            return None;
        }
        self.username.as_deref().filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub id: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextEntity {
    pub offset: i32,
    pub length: i32,
    pub entity_type: EntityType,
    pub data: Option<String>,
}

impl TextEntity {
    pub fn text_url(offset: i32, length: i32, url: impl Into<String>) -> Self {
        Self {
            offset,
            length,
            entity_type: EntityType::TextUrl,
            data: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Code,
    Pre,
    TextUrl,
    Mention,
    Hashtag,
    Spoiler,
    Blockquote,
    Url,
    Email,
    Phone,
    Cashtag,
    BankCard,
    BotCommand,
    CustomEmoji,
}
