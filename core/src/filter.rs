use super::classify::ContentKind;
use super::model::SourceMessage;
use std::collections::HashSet;
use std::fmt;

/// 按内容类型开关，全部默认开启
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindToggles {
    pub photos: bool,
    pub videos: bool,
    pub files: bool,
    pub voices: bool,
    pub music: bool,
    pub gifs: bool,
    pub stickers: bool,
    pub polls: bool,
    pub contacts: bool,
    pub albums: bool,
    pub forwards: bool,
}

impl Default for KindToggles {
    fn default() -> Self {
        Self {
            photos: true,
            videos: true,
            files: true,
            voices: true,
            music: true,
            gifs: true,
            stickers: true,
            polls: true,
            contacts: true,
            albums: true,
            forwards: true,
        }
    }
}

impl KindToggles {
    pub fn allows(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Photo => self.photos,
            ContentKind::Video => self.videos,
            ContentKind::File => self.files,
            ContentKind::Voice => self.voices,
            ContentKind::Music => self.music,
            ContentKind::Animated => self.gifs,
            ContentKind::Sticker => self.stickers,
            ContentKind::Poll => self.polls,
            ContentKind::Contact => self.contacts,
            ContentKind::None => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterRules {
    pub toggles: KindToggles,
    pub min_length: usize,
    pub max_length: usize,
    pub contains: Vec<String>,
    pub not_contains: Vec<String>,
    pub blacklisted_senders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    KindDisabled(ContentKind),
    AlbumsDisabled,
    ForwardsDisabled,
    TooShort(usize),
    TooLong(usize),
    MissingKeyword,
    BlockedKeyword(String),
    BlacklistedSender(i64),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::KindDisabled(kind) => write!(f, "类型已禁用: {}", kind),
            SkipReason::AlbumsDisabled => f.write_str("相册已禁用"),
            SkipReason::ForwardsDisabled => f.write_str("转发消息已禁用"),
            SkipReason::TooShort(len) => write!(f, "文本过短: {}", len),
            SkipReason::TooLong(len) => write!(f, "文本过长: {}", len),
            SkipReason::MissingKeyword => f.write_str("未匹配包含关键词"),
            SkipReason::BlockedKeyword(kw) => write!(f, "匹配排除关键词: {}", kw),
            SkipReason::BlacklistedSender(id) => write!(f, "发送者在黑名单: {}", id),
        }
    }
}

/// 内容过滤：类型开关、文本长度、关键词（不区分大小写）与发送者黑名单
///
/// 长度与关键词规则作用于消息原文，纯媒体消息的原文为空字符串。
#[derive(Debug, Clone)]
pub struct ContentFilter {
    toggles: KindToggles,
    min_length: usize,
    max_length: usize,
    contains: Vec<String>,
    not_contains: Vec<String>,
    blocked_ids: HashSet<i64>,
    blocked_usernames: HashSet<String>,
}

impl ContentFilter {
    pub fn new(rules: FilterRules) -> Self {
        let mut blocked_ids = HashSet::new();
        let mut blocked_usernames = HashSet::new();
        for entry in &rules.blacklisted_senders {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match entry.parse::<i64>() {
                Ok(id) => {
                    blocked_ids.insert(id);
                }
                Err(_) => {
                    blocked_usernames.insert(entry.trim_start_matches('@').to_lowercase());
                }
            }
        }

        Self {
            toggles: rules.toggles,
            min_length: rules.min_length,
            max_length: rules.max_length,
            contains: normalize_keywords(&rules.contains),
            not_contains: normalize_keywords(&rules.not_contains),
            blocked_ids,
            blocked_usernames,
        }
    }

    pub fn allow_all() -> Self {
        Self::new(FilterRules::default())
    }

    /// 返回 None 表示放行
    pub fn check(&self, msg: &SourceMessage, kind: ContentKind) -> Option<SkipReason> {
        if !self.toggles.allows(kind) {
            return Some(SkipReason::KindDisabled(kind));
        }
        if msg.album_id.is_some() && !self.toggles.albums {
            return Some(SkipReason::AlbumsDisabled);
        }
        if msg.forward.is_some() && !self.toggles.forwards {
            return Some(SkipReason::ForwardsDisabled);
        }

        if let Some(sender) = &msg.sender {
            let by_name = sender
                .username
                .as_deref()
                .map(|u| self.blocked_usernames.contains(&u.to_lowercase()))
                .unwrap_or(false);
            if by_name || self.blocked_ids.contains(&sender.id) {
                return Some(SkipReason::BlacklistedSender(sender.id));
            }
        }

        let length = msg.text.chars().count();
        if self.min_length > 0 && length < self.min_length {
            return Some(SkipReason::TooShort(length));
        }
        if self.max_length > 0 && length > self.max_length {
            return Some(SkipReason::TooLong(length));
        }

        if self.contains.is_empty() && self.not_contains.is_empty() {
            return None;
        }
        let normalized = msg.text.to_lowercase();
        if !self.contains.is_empty() && !self.contains.iter().any(|kw| normalized.contains(kw)) {
            return Some(SkipReason::MissingKeyword);
        }
        for kw in &self.not_contains {
            if normalized.contains(kw) {
                return Some(SkipReason::BlockedKeyword(kw.clone()));
            }
        }

        None
    }
}

fn normalize_keywords(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
