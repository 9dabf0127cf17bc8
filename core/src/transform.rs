use super::model::{ChatInfo, TextEntity};
use common::utf16::{byte_to_utf16, utf16_len};
use regex::Regex;
use std::ops::Range;

const URL_PATTERNS: [&str; 2] = [r"https?://\S+", r"t\.me/\S+"];
const ORIGINAL_POST_LABEL: &str = "Original post";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

impl Replacement {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// 来源署名所需的公开频道信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    username: String,
    title: String,
}

impl SourceLink {
    pub fn new(username: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            title: title.into(),
        }
    }

    /// 私有会话与普通用户没有可链接的地址，返回 None
    pub fn from_chat(chat: &ChatInfo) -> Option<Self> {
        chat.public_handle()
            .map(|username| Self::new(username, chat.title.clone()))
    }

    fn post_url(&self, message_id: i32) -> String {
        format!("https://t.me/{}/{}", self.username, message_id)
    }

    fn chat_url(&self) -> String {
        format!("https://t.me/{}", self.username)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformedText {
    pub text: String,
    pub entities: Vec<TextEntity>,
}

/// 文本改写：字面替换、链接移除、来源署名，按此顺序执行
///
/// 所有改写都同步调整格式实体（UTF-16 偏移）。跨越被改写区域的实体会被丢弃，
/// 完整包含改写区域的实体随之伸缩，位于其后的实体整体平移。
#[derive(Debug, Clone)]
pub struct TextTransformer {
    replacements: Vec<Replacement>,
    url_patterns: Vec<Regex>,
    space_runs: Regex,
    source_link: Option<SourceLink>,
}

impl TextTransformer {
    pub fn new(
        replacements: Vec<Replacement>,
        remove_urls: bool,
        source_link: Option<SourceLink>,
    ) -> anyhow::Result<Self> {
        let url_patterns = if remove_urls {
            URL_PATTERNS
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            replacements: replacements
                .into_iter()
                .filter(|r| !r.from.is_empty())
                .collect(),
            url_patterns,
            space_runs: Regex::new(" {2,}")?,
            source_link,
        })
    }

    pub fn passthrough() -> anyhow::Result<Self> {
        Self::new(Vec::new(), false, None)
    }

    pub fn transform(&self, message_id: i32, text: &str, entities: &[TextEntity]) -> TransformedText {
        let mut out = TransformedText {
            text: text.to_string(),
            entities: entities.to_vec(),
        };

        if !out.text.is_empty() {
            self.apply_replacements(&mut out);
        }
        if !out.text.is_empty() && !self.url_patterns.is_empty() {
            self.strip_urls(&mut out);
        }
        if !out.text.is_empty() {
            if let Some(link) = &self.source_link {
                append_source_link(&mut out, link, message_id);
            }
        }

        out
    }

    fn apply_replacements(&self, out: &mut TransformedText) {
        for pair in &self.replacements {
            let mut cursor = 0;
            while let Some(pos) = out.text[cursor..].find(&pair.from) {
                let start = cursor + pos;
                splice(out, start..start + pair.from.len(), &pair.to);
                cursor = start + pair.to.len();
            }
        }
    }

    fn strip_urls(&self, out: &mut TransformedText) {
        for pattern in &self.url_patterns {
            let found: Vec<Range<usize>> = pattern.find_iter(&out.text).map(|m| m.range()).collect();
            for range in found.into_iter().rev() {
                splice(out, range, "");
            }
        }

        let runs: Vec<Range<usize>> = self
            .space_runs
            .find_iter(&out.text)
            .map(|m| m.range())
            .collect();
        for range in runs.into_iter().rev() {
            splice(out, range, " ");
        }

        let trailing = out.text.len() - out.text.trim_end().len();
        if trailing > 0 {
            let len = out.text.len();
            splice(out, len - trailing..len, "");
        }
        let leading = out.text.len() - out.text.trim_start().len();
        if leading > 0 {
            splice(out, 0..leading, "");
        }
    }
}

fn append_source_link(out: &mut TransformedText, link: &SourceLink, message_id: i32) {
    let base = utf16_len(&out.text) as i32 + 2;
    let label_len = utf16_len(ORIGINAL_POST_LABEL) as i32;
    let title_offset = base + utf16_len(ORIGINAL_POST_LABEL) as i32 + utf16_len(" from ") as i32;

    out.text
        .push_str(&format!("\n\n{} from {}", ORIGINAL_POST_LABEL, link.title));
    out.entities
        .push(TextEntity::text_url(base, label_len, link.post_url(message_id)));
    if !link.title.is_empty() {
        out.entities.push(TextEntity::text_url(
            title_offset,
            utf16_len(&link.title) as i32,
            link.chat_url(),
        ));
    }
}

/// 将 `range`（字节区间）替换为 `replacement`，并按 UTF-16 偏移调整实体
fn splice(out: &mut TransformedText, range: Range<usize>, replacement: &str) {
    let start = byte_to_utf16(&out.text, range.start) as i32;
    let removed = utf16_len(&out.text[range.clone()]) as i32;
    let end = start + removed;
    let diff = utf16_len(replacement) as i32 - removed;

    out.entities.retain_mut(|ent| {
        let ent_end = ent.offset + ent.length;
        if ent_end <= start {
            true
        } else if ent.offset >= end {
            ent.offset += diff;
            true
        } else if ent.offset <= start && ent_end >= end {
            ent.length += diff;
            ent.length > 0
        } else {
            false
        }
    });

    out.text.replace_range(range, replacement);
}
