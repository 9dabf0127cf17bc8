use super::client::peer_key;
use chrono::DateTime;
use grammers_client::{grammers_tl_types as tl, types::Message};
use tg_core::{
    Contact, DocumentAttribute, DocumentInfo, EntityType, ForwardOrigin, Media, PeerKey, Poll,
    PollAnswer, SenderRef, SourceMessage, TextEntity,
};

/// 转换一条历史消息；服务消息与空消息返回 None
pub fn convert_message(msg: &Message) -> Option<SourceMessage> {
    let raw = match &msg.raw {
        tl::enums::Message::Message(m) => m,
        tl::enums::Message::Service(_) | tl::enums::Message::Empty(_) => return None,
    };

    let mut converted = convert_raw(raw);
    if let Some(sender) = converted.sender.as_mut() {
        sender.username = msg
            .sender()
            .and_then(|peer| peer.username().map(str::to_string));
    }
    Some(converted)
}

pub fn convert_raw(m: &tl::types::Message) -> SourceMessage {
    SourceMessage {
        id: m.id,
        date: DateTime::from_timestamp(i64::from(m.date), 0).unwrap_or_default(),
        text: m.message.clone(),
        entities: m
            .entities
            .as_ref()
            .map(|ents| ents.iter().filter_map(entity_from_tl).collect())
            .unwrap_or_default(),
        media: m.media.as_ref().and_then(convert_media),
        reply_to: m.reply_to.as_ref().and_then(|r| match r {
            tl::enums::MessageReplyHeader::Header(h) => h.reply_to_msg_id,
            _ => None,
        }),
        album_id: m.grouped_id,
        forward: m.fwd_from.as_ref().map(convert_forward),
        sender: m.from_id.as_ref().map(|peer| SenderRef {
            id: dialog_id(peer_key(peer)),
            username: None,
        }),
    }
}

fn convert_forward(header: &tl::enums::MessageFwdHeader) -> ForwardOrigin {
    match header {
        tl::enums::MessageFwdHeader::Header(h) => ForwardOrigin {
            sender: h.from_id.as_ref().map(peer_key),
            channel_post: h.channel_post,
            from_name: h.from_name.clone(),
        },
    }
}

fn convert_media(media: &tl::enums::MessageMedia) -> Option<Media> {
    match media {
        tl::enums::MessageMedia::Photo(p) => p.photo.as_ref().map(|_| Media::Photo),
        tl::enums::MessageMedia::Document(d) => match d.document.as_ref() {
            Some(tl::enums::Document::Document(doc)) => Some(Media::Document(DocumentInfo {
                attributes: doc.attributes.iter().map(convert_attribute).collect(),
                file_name: doc.attributes.iter().find_map(|attr| match attr {
                    tl::enums::DocumentAttribute::Filename(f) => Some(f.file_name.clone()),
                    _ => None,
                }),
                mime_type: Some(doc.mime_type.clone()).filter(|m| !m.is_empty()),
            })),
            _ => None,
        },
        tl::enums::MessageMedia::Poll(p) => match &p.poll {
            tl::enums::Poll::Poll(poll) => Some(Media::Poll(Poll {
                question: plain_text(&poll.question),
                answers: poll
                    .answers
                    .iter()
                    .map(|answer| match answer {
                        tl::enums::PollAnswer::Answer(a) => PollAnswer {
                            text: plain_text(&a.text),
                            option: a.option.clone(),
                        },
                    })
                    .collect(),
                quiz: poll.quiz,
                multiple_choice: poll.multiple_choice,
                public_voters: poll.public_voters,
                closed: poll.closed,
            })),
        },
        tl::enums::MessageMedia::Contact(c) => Some(Media::Contact(Contact {
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            phone_number: c.phone_number.clone(),
            vcard: c.vcard.clone(),
        })),
        tl::enums::MessageMedia::WebPage(_) => Some(Media::WebPage),
        _ => None,
    }
}

fn convert_attribute(attr: &tl::enums::DocumentAttribute) -> DocumentAttribute {
    match attr {
        tl::enums::DocumentAttribute::Video(_) => DocumentAttribute::Video,
        tl::enums::DocumentAttribute::Audio(a) => DocumentAttribute::Audio { voice: a.voice },
        tl::enums::DocumentAttribute::Sticker(_) => DocumentAttribute::Sticker,
        tl::enums::DocumentAttribute::Animated => DocumentAttribute::Animated,
        _ => DocumentAttribute::Other,
    }
}

fn plain_text(text: &tl::enums::TextWithEntities) -> String {
    match text {
        tl::enums::TextWithEntities::Entities(t) => t.text.clone(),
    }
}

/// Bot API 形式的 id：频道 -100xxx，普通群 -xxx，用户为正数
pub fn dialog_id(key: PeerKey) -> i64 {
    match key {
        PeerKey::User(id) => id,
        PeerKey::Chat(id) => -id,
        PeerKey::Channel(id) => -1_000_000_000_000 - id,
    }
}

/// 媒体落盘文件名：消息 id 前缀避免重名，扩展名决定上传时的类型识别
pub fn media_file_name(msg: &SourceMessage) -> String {
    match &msg.media {
        Some(Media::Document(doc)) => {
            if let Some(name) = doc.file_name.as_deref().map(sanitize_file_name) {
                if !name.is_empty() {
                    return format!("{}_{}", msg.id, name);
                }
            }
            let ext = doc
                .mime_type
                .as_deref()
                .map(extension_for_mime)
                .unwrap_or("bin");
            format!("{}.{}", msg.id, ext)
        }
        _ => format!("{}.jpg", msg.id),
    }
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') { '_' } else { c })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "application/x-tgsticker" => "tgs",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        _ => "bin",
    }
}

pub fn entity_from_tl(entity: &tl::enums::MessageEntity) -> Option<TextEntity> {
    let (offset, length, entity_type, data) = match entity {
        tl::enums::MessageEntity::Bold(e) => (e.offset, e.length, EntityType::Bold, None),
        tl::enums::MessageEntity::Italic(e) => (e.offset, e.length, EntityType::Italic, None),
        tl::enums::MessageEntity::Underline(e) => {
            (e.offset, e.length, EntityType::Underline, None)
        }
        tl::enums::MessageEntity::Strike(e) => {
            (e.offset, e.length, EntityType::Strikethrough, None)
        }
        tl::enums::MessageEntity::Code(e) => (e.offset, e.length, EntityType::Code, None),
        tl::enums::MessageEntity::Pre(e) => (
            e.offset,
            e.length,
            EntityType::Pre,
            Some(e.language.clone()),
        ),
        tl::enums::MessageEntity::TextUrl(e) => {
            (e.offset, e.length, EntityType::TextUrl, Some(e.url.clone()))
        }
        tl::enums::MessageEntity::Mention(e) => (e.offset, e.length, EntityType::Mention, None),
        tl::enums::MessageEntity::Hashtag(e) => (e.offset, e.length, EntityType::Hashtag, None),
        tl::enums::MessageEntity::Spoiler(e) => (e.offset, e.length, EntityType::Spoiler, None),
        tl::enums::MessageEntity::Blockquote(e) => (
            e.offset,
            e.length,
            EntityType::Blockquote,
            e.collapsed.then(|| "true".to_string()),
        ),
        tl::enums::MessageEntity::Url(e) => (e.offset, e.length, EntityType::Url, None),
        tl::enums::MessageEntity::Email(e) => (e.offset, e.length, EntityType::Email, None),
        tl::enums::MessageEntity::Phone(e) => (e.offset, e.length, EntityType::Phone, None),
        tl::enums::MessageEntity::Cashtag(e) => (e.offset, e.length, EntityType::Cashtag, None),
        tl::enums::MessageEntity::BankCard(e) => {
            (e.offset, e.length, EntityType::BankCard, None)
        }
        tl::enums::MessageEntity::BotCommand(e) => {
            (e.offset, e.length, EntityType::BotCommand, None)
        }
        tl::enums::MessageEntity::CustomEmoji(e) => (
            e.offset,
            e.length,
            EntityType::CustomEmoji,
            Some(e.document_id.to_string()),
        ),
        _ => return None,
    };

    Some(TextEntity {
        offset,
        length,
        entity_type,
        data,
    })
}

/// 只读实体（提及、话题标签等）由服务端重新识别，无需回传
pub fn entity_to_tl(entity: &TextEntity) -> Option<tl::enums::MessageEntity> {
    let (offset, length) = (entity.offset, entity.length);
    let converted: tl::enums::MessageEntity = match entity.entity_type {
        EntityType::Bold => tl::types::MessageEntityBold { offset, length }.into(),
        EntityType::Italic => tl::types::MessageEntityItalic { offset, length }.into(),
        EntityType::Underline => tl::types::MessageEntityUnderline { offset, length }.into(),
        EntityType::Strikethrough => tl::types::MessageEntityStrike { offset, length }.into(),
        EntityType::Code => tl::types::MessageEntityCode { offset, length }.into(),
        EntityType::Spoiler => tl::types::MessageEntitySpoiler { offset, length }.into(),
        EntityType::Pre => tl::types::MessageEntityPre {
            offset,
            length,
            language: entity.data.clone().unwrap_or_default(),
        }
        .into(),
        EntityType::TextUrl => tl::types::MessageEntityTextUrl {
            offset,
            length,
            url: entity.data.clone()?,
        }
        .into(),
        EntityType::Blockquote => tl::types::MessageEntityBlockquote {
            collapsed: entity.data.as_deref() == Some("true"),
            offset,
            length,
        }
        .into(),
        EntityType::CustomEmoji => tl::types::MessageEntityCustomEmoji {
            offset,
            length,
            document_id: entity.data.as_ref()?.parse::<i64>().ok()?,
        }
        .into(),
        EntityType::Mention
        | EntityType::Hashtag
        | EntityType::Url
        | EntityType::Email
        | EntityType::Phone
        | EntityType::Cashtag
        | EntityType::BankCard
        | EntityType::BotCommand => return None,
    };
    Some(converted)
}
