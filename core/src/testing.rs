//! 测试用的内存平台实现

use crate::dispatch::{DispatchConfig, DispatchEngine};
use crate::filter::ContentFilter;
use crate::model::{ForwardOrigin, SentMessage, SourceMessage};
use crate::platform::{
    FetchRange, ForwardSource, OutgoingMessage, Platform, PlatformFuture, SendError,
};
use crate::transform::TextTransformer;
use chrono::DateTime;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use storage::MediaStash;

type FailRule = Box<dyn Fn(&OutgoingMessage) -> Option<SendError> + Send + Sync>;

pub fn text_message(id: i32, text: &str) -> SourceMessage {
    SourceMessage {
        id,
        date: DateTime::from_timestamp(1_700_000_000 + i64::from(id) * 60, 0).unwrap(),
        text: text.to_string(),
        entities: Vec::new(),
        media: None,
        reply_to: None,
        album_id: None,
        forward: None,
        sender: None,
    }
}

pub fn engine_with(platform: Arc<ScriptedPlatform>, dir: &Path) -> DispatchEngine {
    DispatchEngine::new(
        platform,
        TextTransformer::passthrough().unwrap(),
        ContentFilter::allow_all(),
        MediaStash::new(dir),
        DispatchConfig::default(),
    )
}

#[derive(Default)]
struct Recorded {
    next_id: i32,
    attempts: Vec<OutgoingMessage>,
    delivered: Vec<OutgoingMessage>,
    queued: VecDeque<SendError>,
    fetches: Vec<FetchRange>,
    disconnected: bool,
}

/// 按脚本返回结果的平台：先消费排队的错误，再匹配失败规则，其余发送一律成功
pub struct ScriptedPlatform {
    history: Vec<SourceMessage>,
    rules: Vec<FailRule>,
    download_fails: bool,
    forward_resolution_fails: bool,
    fetch_fails: bool,
    recorded: Mutex<Recorded>,
}

impl ScriptedPlatform {
    pub fn new(history: Vec<SourceMessage>) -> Self {
        Self {
            history,
            rules: Vec::new(),
            download_fails: false,
            forward_resolution_fails: false,
            fetch_fails: false,
            recorded: Mutex::new(Recorded {
                next_id: 1000,
                ..Default::default()
            }),
        }
    }

    pub fn fail_when<F>(mut self, rule: F) -> Self
    where
        F: Fn(&OutgoingMessage) -> Option<SendError> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn queue_error(self, error: SendError) -> Self {
        self.recorded.lock().unwrap().queued.push_back(error);
        self
    }

    pub fn fail_downloads(mut self) -> Self {
        self.download_fails = true;
        self
    }

    pub fn fail_forward_resolution(mut self) -> Self {
        self.forward_resolution_fails = true;
        self
    }

    pub fn fail_fetch(mut self) -> Self {
        self.fetch_fails = true;
        self
    }

    pub fn attempts(&self) -> Vec<OutgoingMessage> {
        self.recorded.lock().unwrap().attempts.clone()
    }

    pub fn delivered(&self) -> Vec<OutgoingMessage> {
        self.recorded.lock().unwrap().delivered.clone()
    }

    pub fn fetches(&self) -> Vec<FetchRange> {
        self.recorded.lock().unwrap().fetches.clone()
    }

    pub fn disconnected(&self) -> bool {
        self.recorded.lock().unwrap().disconnected
    }
}

impl Platform for ScriptedPlatform {
    fn fetch_history(&self, range: FetchRange) -> PlatformFuture<'_, anyhow::Result<Vec<SourceMessage>>> {
        Box::pin(async move {
            self.recorded.lock().unwrap().fetches.push(range);
            if self.fetch_fails {
                anyhow::bail!("CHANNEL_PRIVATE");
            }
            let mut messages: Vec<SourceMessage> = self
                .history
                .iter()
                .filter(|m| range.contains(m.id))
                .cloned()
                .collect();
            messages.sort_by_key(|m| m.id);
            if range.limit > 0 {
                messages.truncate(range.limit);
            }
            Ok(messages)
        })
    }

    fn download_media<'a>(
        &'a self,
        message: &'a SourceMessage,
        dir: &'a Path,
    ) -> PlatformFuture<'a, anyhow::Result<PathBuf>> {
        Box::pin(async move {
            if self.download_fails {
                anyhow::bail!("FILE_REFERENCE_EXPIRED");
            }
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("{}.bin", message.id));
            std::fs::write(&path, b"media")?;
            Ok(path)
        })
    }

    fn resolve_forward_sender<'a>(
        &'a self,
        origin: &'a ForwardOrigin,
    ) -> PlatformFuture<'a, anyhow::Result<ForwardSource>> {
        Box::pin(async move {
            if self.forward_resolution_fails {
                anyhow::bail!("PEER_ID_INVALID");
            }
            let peer = origin
                .sender
                .ok_or_else(|| anyhow::anyhow!("forward without sender"))?;
            Ok(ForwardSource {
                peer,
                name: "origin".to_string(),
            })
        })
    }

    fn send<'a>(&'a self, message: &'a OutgoingMessage) -> PlatformFuture<'a, Result<SentMessage, SendError>> {
        Box::pin(async move {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.attempts.push(message.clone());
            if let Some(error) = recorded.queued.pop_front() {
                return Err(error);
            }
            if let Some(error) = self.rules.iter().find_map(|rule| rule(message)) {
                return Err(error);
            }
            let id = recorded.next_id;
            recorded.next_id += 1;
            recorded.delivered.push(message.clone());
            Ok(SentMessage { id })
        })
    }

    fn disconnect(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            self.recorded.lock().unwrap().disconnected = true;
        })
    }
}
