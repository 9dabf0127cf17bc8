use super::client::{chat_info, TdlibClient};
use super::convert::{convert_message, media_file_name};
use super::send::MessageSender;
use anyhow::{anyhow, Context, Result};
use grammers_session::defs::PeerRef;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tg_core::{
    ChatInfo, FetchRange, ForwardOrigin, ForwardSource, OutgoingMessage, Platform, PlatformFuture,
    SendError, SentMessage, SourceMessage,
};
use tracing::{info, warn};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// 基于 grammers 用户账号会话的平台实现
pub struct GrammersPlatform {
    client: Arc<TdlibClient>,
    sender: MessageSender,
    source: PeerRef,
    source_info: ChatInfo,
}

impl GrammersPlatform {
    /// 解析源与目标会话，任何一个无法访问都视为致命错误
    pub async fn open(client: Arc<TdlibClient>, source: &str, destination: &str) -> Result<Self> {
        let source_peer = client
            .resolve_chat(source)
            .await
            .with_context(|| format!("无法访问源会话: {}", source))?;
        let destination_peer = client
            .resolve_chat(destination)
            .await
            .with_context(|| format!("无法访问目标会话: {}", destination))?;

        let source_info = chat_info(&source_peer);
        let destination_info = chat_info(&destination_peer);
        info!(
            "源会话: {} (id={}) -> 目标会话: {} (id={})",
            source_info.title, source_info.id, destination_info.title, destination_info.id
        );

        let source_ref: PeerRef = (&source_peer).into();
        let destination_ref: PeerRef = (&destination_peer).into();
        let sender = MessageSender::new(client.client().clone(), source_ref, destination_ref);

        Ok(Self {
            client,
            sender,
            source: source_ref,
            source_info,
        })
    }

    pub fn source_info(&self) -> &ChatInfo {
        &self.source_info
    }
}

impl Platform for GrammersPlatform {
    fn fetch_history(
        &self,
        range: FetchRange,
    ) -> PlatformFuture<'_, Result<Vec<SourceMessage>>> {
        Box::pin(async move {
            // 有数量上限时从最旧一端分页，只取需要的条数
            let (mut messages, scanned) = if range.limit > 0 {
                let raw = self.client.history_ascending(self.source, range).await?;
                let messages: Vec<SourceMessage> = raw.iter().filter_map(convert_message).collect();
                (messages, raw.len())
            } else {
                let mut messages = Vec::new();
                let scanned = self
                    .client
                    .scan_history(self.source, range, |msg| {
                        messages.extend(convert_message(msg));
                    })
                    .await?;
                (messages, scanned)
            };

            if messages.len() < scanned {
                info!("跳过服务消息: {} 条", scanned - messages.len());
            }
            messages.sort_by_key(|m| m.id);
            Ok(messages)
        })
    }

    fn download_media<'a>(
        &'a self,
        message: &'a SourceMessage,
        dir: &'a Path,
    ) -> PlatformFuture<'a, Result<PathBuf>> {
        Box::pin(async move {
            let media = self
                .client
                .message_by_id(self.source, message.id)
                .await?
                .and_then(|msg| msg.media())
                .ok_or_else(|| anyhow!("消息没有可下载的媒体: id={}", message.id))?;
            let path = dir.join(media_file_name(message));
            self.client.download(&media, &path, DOWNLOAD_TIMEOUT).await
        })
    }

    fn resolve_forward_sender<'a>(
        &'a self,
        origin: &'a ForwardOrigin,
    ) -> PlatformFuture<'a, Result<ForwardSource>> {
        Box::pin(async move {
            let key = origin.sender.ok_or_else(|| match &origin.from_name {
                Some(name) => anyhow!("原作者隐藏了账号: {}", name),
                None => anyhow!("转发消息缺少原作者"),
            })?;
            let peer = self.client.resolve_key(key).await.map_err(|e| {
                warn!("无法解析原作者: {:?}: {:#}", key, e);
                e
            })?;
            Ok(ForwardSource {
                peer: key,
                name: chat_info(&peer).title,
            })
        })
    }

    fn send<'a>(
        &'a self,
        message: &'a OutgoingMessage,
    ) -> PlatformFuture<'a, Result<SentMessage, SendError>> {
        Box::pin(self.sender.send(message))
    }

    fn disconnect(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            self.client.disconnect();
        })
    }
}
