use super::classify::ContentKind;
use super::model::{Contact, ForwardOrigin, PeerKey, Poll, SentMessage, SourceMessage, TextEntity};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub type PlatformFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 闭区间 id 范围，0 表示不设限
///
/// `limit` 大于 0 时只取范围内最早的 `limit` 条消息。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchRange {
    pub min_id: i32,
    pub max_id: i32,
    pub limit: usize,
}

impl FetchRange {
    pub fn contains(&self, id: i32) -> bool {
        (self.min_id <= 0 || id >= self.min_id) && (self.max_id <= 0 || id <= self.max_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("触发限流，需要等待 {seconds} 秒")]
    RateLimited { seconds: u64 },
    #[error("没有发送权限: {0}")]
    PermissionDenied(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub kind: ContentKind,
}

/// 原始转发者，已由平台解析为可引用的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSource {
    pub peer: PeerKey,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Poll(Poll),
    Contact(Contact),
    Forward {
        source_message_id: i32,
        sender: ForwardSource,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutgoingMessage {
    pub text: String,
    pub entities: Vec<TextEntity>,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<i32>,
    pub payload: Option<Payload>,
}

/// 引擎与消息平台之间的接口
pub trait Platform: Send + Sync {
    /// 按 id 升序返回范围内的历史消息，不含服务消息；设置了 `limit` 时不超过该条数
    fn fetch_history(&self, range: FetchRange) -> PlatformFuture<'_, anyhow::Result<Vec<SourceMessage>>>;

    fn download_media<'a>(
        &'a self,
        message: &'a SourceMessage,
        dir: &'a Path,
    ) -> PlatformFuture<'a, anyhow::Result<PathBuf>>;

    fn resolve_forward_sender<'a>(
        &'a self,
        origin: &'a ForwardOrigin,
    ) -> PlatformFuture<'a, anyhow::Result<ForwardSource>>;

    fn send<'a>(&'a self, message: &'a OutgoingMessage) -> PlatformFuture<'a, Result<SentMessage, SendError>>;

    fn disconnect(&self) -> PlatformFuture<'_, ()>;
}
