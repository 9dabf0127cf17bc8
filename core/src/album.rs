use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumAction {
    NotAlbum,
    /// 相册的第一条消息，代表整个相册发送
    First(i64),
    Duplicate(i64),
}

impl AlbumAction {
    pub fn should_process(self) -> bool {
        !matches!(self, AlbumAction::Duplicate(_))
    }
}

/// 相册去重：同一相册只处理首条消息，其余消息计为跳过
#[derive(Debug, Default)]
pub struct AlbumCoordinator {
    seen: HashSet<i64>,
}

impl AlbumCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, album_id: Option<i64>) -> AlbumAction {
        let Some(album_id) = album_id else {
            return AlbumAction::NotAlbum;
        };

        if self.seen.insert(album_id) {
            debug!("相册首条消息: album_id={}", album_id);
            AlbumAction::First(album_id)
        } else {
            AlbumAction::Duplicate(album_id)
        }
    }

    pub fn should_process(&mut self, album_id: Option<i64>) -> bool {
        self.observe(album_id).should_process()
    }
}
