use super::classify::ContentKind;
use std::fmt;

/// 单次运行的统计计数，只增不减
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub total: usize,
    pub cloned: usize,
    pub skipped: usize,
    pub failed: usize,
    pub photos: usize,
    pub videos: usize,
    pub files: usize,
    pub voices: usize,
    pub music: usize,
    pub gifs: usize,
    pub stickers: usize,
    pub polls: usize,
    pub contacts: usize,
    pub albums: usize,
    pub forwards: usize,
    pub text_only: usize,
}

impl ReplicationStats {
    pub fn record_kind(&mut self, kind: ContentKind) {
        match kind {
            ContentKind::Photo => self.photos += 1,
            ContentKind::Video => self.videos += 1,
            ContentKind::File => self.files += 1,
            ContentKind::Voice => self.voices += 1,
            ContentKind::Music => self.music += 1,
            ContentKind::Animated => self.gifs += 1,
            ContentKind::Sticker => self.stickers += 1,
            ContentKind::Poll => self.polls += 1,
            ContentKind::Contact => self.contacts += 1,
            ContentKind::None => {}
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.cloned as f64 * 100.0 / self.total as f64
    }
}

impl fmt::Display for ReplicationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "========== 克隆统计 ==========")?;
        writeln!(f, "消息总数: {}", self.total)?;
        writeln!(f, "成功: {}", self.cloned)?;
        writeln!(f, "跳过: {}", self.skipped)?;
        writeln!(f, "失败: {}", self.failed)?;
        writeln!(f, "------------------------------")?;
        writeln!(f, "图片: {}", self.photos)?;
        writeln!(f, "视频: {}", self.videos)?;
        writeln!(f, "文件: {}", self.files)?;
        writeln!(f, "语音: {}", self.voices)?;
        writeln!(f, "音乐: {}", self.music)?;
        writeln!(f, "动图: {}", self.gifs)?;
        writeln!(f, "贴纸: {}", self.stickers)?;
        writeln!(f, "投票: {}", self.polls)?;
        writeln!(f, "联系人: {}", self.contacts)?;
        writeln!(f, "相册: {}", self.albums)?;
        writeln!(f, "转发: {}", self.forwards)?;
        writeln!(f, "纯文本: {}", self.text_only)?;
        writeln!(f, "------------------------------")?;
        write!(f, "成功率: {:.1}%", self.success_rate())
    }
}
