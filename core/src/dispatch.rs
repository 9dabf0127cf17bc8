use super::album::{AlbumAction, AlbumCoordinator};
use super::classify::{classify, ContentKind};
use super::filter::ContentFilter;
use super::model::{Contact, ForwardOrigin, Media, Poll, SentMessage, SourceMessage, TextEntity};
use super::platform::{Attachment, OutgoingMessage, Payload, Platform, SendError};
use super::reply::ReplyResolver;
use super::retry::FloodWaitPolicy;
use super::stats::ReplicationStats;
use super::transform::TextTransformer;
use common::preview_line;
use std::collections::HashSet;
use std::sync::Arc;
use storage::MediaStash;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const FORWARDED_NOTE: &str = "[Forwarded message]";
const MEDIA_FAILED_NOTE: &str = "[Media could not be sent]";
const LOG_PREVIEW_LEN: usize = 30;

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchConfig {
    pub anonymize_forwards: bool,
    pub flood_wait: FloodWaitPolicy,
}

/// 发送计划中的阶段，用于成功后的统计归类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Poll,
    Contact,
    Forward,
    Generic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptKind {
    NativePoll(Poll),
    NativeContact(Contact),
    Forward(ForwardOrigin),
    Plain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub stage: Stage,
    pub kind: AttemptKind,
    pub text: String,
    pub with_media: bool,
}

impl Attempt {
    fn plain(stage: Stage, text: String, with_media: bool) -> Self {
        Self {
            stage,
            kind: AttemptKind::Plain,
            text,
            with_media,
        }
    }

    fn same_request(&self, other: &Attempt) -> bool {
        self.kind == other.kind && self.text == other.text && self.with_media == other.with_media
    }
}

/// 按优先级生成一条消息的发送尝试序列，前一项失败才执行下一项
///
/// `text` 为改写后的文本，`has_media` 表示媒体已成功下载。
/// `verbatim` 表示文本未被改写且无需挂接回复，只有此时才会原样转发。
pub fn plan_attempts(
    msg: &SourceMessage,
    text: &str,
    has_media: bool,
    anonymize_forwards: bool,
    verbatim: bool,
) -> Vec<Attempt> {
    let mut plan = Vec::new();
    let mut body = text.to_string();

    match &msg.media {
        Some(Media::Poll(poll)) => {
            let caption = if text.is_empty() {
                poll.question.clone()
            } else {
                text.to_string()
            };
            plan.push(Attempt {
                stage: Stage::Poll,
                kind: AttemptKind::NativePoll(poll.clone()),
                text: caption,
                with_media: false,
            });
            body = annotate(text, &poll_summary(poll));
        }
        Some(Media::Contact(contact)) => {
            plan.push(Attempt {
                stage: Stage::Contact,
                kind: AttemptKind::NativeContact(contact.clone()),
                text: text.to_string(),
                with_media: false,
            });
            body = annotate(text, &contact_summary(contact));
        }
        _ => {}
    }

    match &msg.forward {
        Some(origin) if !anonymize_forwards => {
            if origin.sender.is_some() && verbatim {
                plan.push(Attempt {
                    stage: Stage::Forward,
                    kind: AttemptKind::Forward(origin.clone()),
                    text: body.clone(),
                    with_media: has_media,
                });
            }
            body = annotate(&body, FORWARDED_NOTE);
            plan.push(Attempt::plain(Stage::Forward, body.clone(), has_media));
        }
        _ => {}
    }

    plan.push(Attempt::plain(Stage::Generic, body.clone(), has_media));
    if has_media {
        plan.push(Attempt::plain(
            Stage::Generic,
            annotate(&body, MEDIA_FAILED_NOTE),
            false,
        ));
    }

    plan.dedup_by(|later, earlier| later.same_request(earlier));
    plan
}

fn annotate(text: &str, note: &str) -> String {
    if text.is_empty() {
        note.to_string()
    } else {
        format!("{}\n\n{}", text, note)
    }
}

fn poll_summary(poll: &Poll) -> String {
    let mut summary = format!("Poll: {}", poll.question);
    for answer in &poll.answers {
        summary.push_str("\n- ");
        summary.push_str(&answer.text);
    }
    summary
}

fn contact_summary(contact: &Contact) -> String {
    format!(
        "Contact: {} {}\nPhone: {}",
        contact.first_name, contact.last_name, contact.phone_number
    )
}

enum PlanOutcome {
    Sent(SentMessage, Stage),
    RateLimited(u64),
    Denied(String),
    Exhausted(Option<anyhow::Error>),
}

/// 单条消息的克隆状态机，持有整次运行的回复映射、相册与统计状态
pub struct DispatchEngine {
    platform: Arc<dyn Platform>,
    transformer: TextTransformer,
    filter: ContentFilter,
    stash: MediaStash,
    config: DispatchConfig,
    replies: ReplyResolver,
    albums: AlbumCoordinator,
    processed: HashSet<i32>,
    stats: ReplicationStats,
    shutdown: CancellationToken,
}

impl DispatchEngine {
    pub fn new(
        platform: Arc<dyn Platform>,
        transformer: TextTransformer,
        filter: ContentFilter,
        stash: MediaStash,
        config: DispatchConfig,
    ) -> Self {
        Self {
            platform,
            transformer,
            filter,
            stash,
            config,
            replies: ReplyResolver::new(),
            albums: AlbumCoordinator::new(),
            processed: HashSet::new(),
            stats: ReplicationStats::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 限流等待期间收到取消信号时放弃当前消息
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn stats(&self) -> &ReplicationStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ReplicationStats {
        &mut self.stats
    }

    /// 处理一条源消息；成功时返回目标消息，跳过、重复或失败时返回 None
    pub async fn process(&mut self, msg: &SourceMessage) -> Option<SentMessage> {
        if !self.processed.insert(msg.id) {
            debug!("消息已处理过，忽略: msg_id={}", msg.id);
            return None;
        }

        match self.albums.observe(msg.album_id) {
            AlbumAction::Duplicate(album_id) => {
                debug!("相册后续消息，跳过: msg_id={} album_id={}", msg.id, album_id);
                self.stats.skipped += 1;
                return None;
            }
            AlbumAction::First(_) => self.stats.albums += 1,
            AlbumAction::NotAlbum => {}
        }

        let kind = classify(msg.media.as_ref());
        if let Some(reason) = self.filter.check(msg, kind) {
            info!("消息被过滤: msg_id={} reason={}", msg.id, reason);
            self.stats.skipped += 1;
            return None;
        }

        let transformed = self.transformer.transform(msg.id, &msg.text, &msg.entities);
        debug!(
            "处理消息: msg_id={} kind={} text={}",
            msg.id,
            kind,
            preview_line(&transformed.text, LOG_PREVIEW_LEN)
        );

        let attachment = self.acquire_media(msg, kind).await;
        let reply_to = self.replies.resolve(msg.reply_to);
        if let (Some(source), Some(target)) = (msg.reply_to, reply_to) {
            debug!("回复关系: msg_id={} {} -> {}", msg.id, source, target);
        }

        let verbatim = reply_to.is_none()
            && transformed.text == msg.text
            && transformed.entities == msg.entities;
        let plan = plan_attempts(
            msg,
            &transformed.text,
            attachment.is_some(),
            self.config.anonymize_forwards,
            verbatim,
        );

        let mut budget = self.config.flood_wait.budget();
        let result = loop {
            let outcome = self
                .run_plan(msg, &plan, &transformed.entities, attachment.as_ref(), reply_to)
                .await;
            match outcome {
                PlanOutcome::Sent(sent, stage) => break Some((sent, stage)),
                PlanOutcome::RateLimited(seconds) => match budget.next_wait(seconds) {
                    Some(wait) => {
                        warn!(
                            "遇到限流 (重试 {}/{}), 等待 {} 秒: msg_id={}",
                            budget.retries(),
                            budget.max_retries(),
                            wait.as_secs(),
                            msg.id
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = self.shutdown.cancelled() => {
                                warn!("限流等待中收到中断信号，放弃消息: msg_id={}", msg.id);
                                break None;
                            }
                        }
                    }
                    None => {
                        error!(
                            "限流重试预算耗尽: msg_id={} retries={} waited={}s",
                            msg.id,
                            budget.retries(),
                            budget.waited().as_secs()
                        );
                        break None;
                    }
                },
                PlanOutcome::Denied(reason) => {
                    error!("没有发送权限: msg_id={} reason={}", msg.id, reason);
                    break None;
                }
                PlanOutcome::Exhausted(last_error) => {
                    match last_error {
                        Some(e) => error!("消息发送失败: msg_id={} error={:#}", msg.id, e),
                        None => error!("消息发送失败: msg_id={}", msg.id),
                    }
                    break None;
                }
            }
        };

        if let Some(attachment) = &attachment {
            self.stash.discard(&attachment.path);
        }

        match result {
            Some((sent, stage)) => {
                self.replies.record(msg.id, sent.id);
                self.stats.cloned += 1;
                self.stats.record_kind(kind);
                if msg.forward.is_some() && !self.config.anonymize_forwards {
                    self.stats.forwards += 1;
                } else if stage == Stage::Generic
                    && attachment.is_none()
                    && msg.forward.is_none()
                {
                    self.stats.text_only += 1;
                }
                info!("消息已克隆: {} -> {}", msg.id, sent.id);
                Some(sent)
            }
            None => {
                self.stats.failed += 1;
                None
            }
        }
    }

    async fn acquire_media(&self, msg: &SourceMessage, kind: ContentKind) -> Option<Attachment> {
        let media = msg.media.as_ref()?;
        if !media.is_downloadable() {
            return None;
        }

        match self.platform.download_media(msg, self.stash.dir()).await {
            Ok(path) => {
                debug!("媒体已下载: msg_id={} path={:?}", msg.id, path);
                Some(Attachment { path, kind })
            }
            Err(e) => {
                warn!("媒体下载失败，改为纯文本发送: msg_id={} error={:#}", msg.id, e);
                None
            }
        }
    }

    async fn run_plan(
        &self,
        msg: &SourceMessage,
        plan: &[Attempt],
        entities: &[TextEntity],
        attachment: Option<&Attachment>,
        reply_to: Option<i32>,
    ) -> PlanOutcome {
        let mut last_error = None;

        for attempt in plan {
            let payload = match &attempt.kind {
                AttemptKind::NativePoll(poll) => Some(Payload::Poll(poll.clone())),
                AttemptKind::NativeContact(contact) => Some(Payload::Contact(contact.clone())),
                AttemptKind::Forward(origin) => {
                    match self.platform.resolve_forward_sender(origin).await {
                        Ok(sender) => Some(Payload::Forward {
                            source_message_id: msg.id,
                            sender,
                        }),
                        Err(e) => {
                            warn!("无法解析原始转发者: msg_id={} error={:#}", msg.id, e);
                            last_error = Some(e);
                            continue;
                        }
                    }
                }
                AttemptKind::Plain => None,
            };

            let outgoing = OutgoingMessage {
                text: attempt.text.clone(),
                entities: if attempt.text.is_empty() {
                    Vec::new()
                } else {
                    entities.to_vec()
                },
                attachment: attachment.filter(|_| attempt.with_media).cloned(),
                reply_to,
                payload,
            };

            match self.platform.send(&outgoing).await {
                Ok(sent) => return PlanOutcome::Sent(sent, attempt.stage),
                Err(SendError::RateLimited { seconds }) => return PlanOutcome::RateLimited(seconds),
                Err(SendError::PermissionDenied(reason)) => return PlanOutcome::Denied(reason),
                Err(SendError::Other(e)) => {
                    warn!(
                        "发送尝试失败，尝试下一种方式: msg_id={} stage={:?} error={:#}",
                        msg.id, attempt.stage, e
                    );
                    last_error = Some(e);
                }
            }
        }

        PlanOutcome::Exhausted(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentAttribute, DocumentInfo, PeerKey, PollAnswer};
    use crate::testing::{engine_with, text_message, ScriptedPlatform};
    use std::time::Duration;

    fn poll() -> Poll {
        Poll {
            question: "Q?".into(),
            answers: vec![
                PollAnswer {
                    text: "yes".into(),
                    option: vec![0],
                },
                PollAnswer {
                    text: "no".into(),
                    option: vec![1],
                },
            ],
            ..Default::default()
        }
    }

    fn forwarded(id: i32, text: &str, sender: Option<PeerKey>) -> SourceMessage {
        let mut msg = text_message(id, text);
        msg.forward = Some(ForwardOrigin {
            sender,
            channel_post: None,
            from_name: None,
        });
        msg
    }

    fn contact() -> Contact {
        Contact {
            first_name: "Ann".into(),
            phone_number: "+1".into(),
            ..Default::default()
        }
    }

    fn video(id: i32, text: &str) -> SourceMessage {
        let mut msg = text_message(id, text);
        msg.media = Some(Media::Document(DocumentInfo {
            attributes: vec![DocumentAttribute::Video],
            ..Default::default()
        }));
        msg
    }

    #[test]
    fn plain_text_plan_is_single_send() {
        let plan = plan_attempts(&text_message(1, "hi"), "hi", false, false, true);
        assert_eq!(plan, vec![Attempt::plain(Stage::Generic, "hi".into(), false)]);
    }

    #[test]
    fn media_plan_retries_without_media() {
        let plan = plan_attempts(&video(1, "clip"), "clip", true, false, true);
        assert_eq!(
            plan,
            vec![
                Attempt::plain(Stage::Generic, "clip".into(), true),
                Attempt::plain(
                    Stage::Generic,
                    "clip\n\n[Media could not be sent]".into(),
                    false
                ),
            ]
        );
    }

    #[test]
    fn poll_plan_falls_back_to_summary() {
        let mut msg = text_message(1, "");
        msg.media = Some(Media::Poll(poll()));
        let plan = plan_attempts(&msg, "", false, false, true);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].kind, AttemptKind::NativePoll(poll()));
        assert_eq!(plan[0].text, "Q?");
        assert_eq!(plan[1].text, "Poll: Q?\n- yes\n- no");
    }

    #[test]
    fn forward_plan_order() {
        let msg = forwarded(1, "fw", Some(PeerKey::User(5)));
        let plan = plan_attempts(&msg, "fw", false, false, true);

        assert_eq!(plan.len(), 2);
        assert!(matches!(plan[0].kind, AttemptKind::Forward(_)));
        assert_eq!(plan[1].stage, Stage::Forward);
        assert_eq!(plan[1].text, "fw\n\n[Forwarded message]");

        let anonymous = plan_attempts(&msg, "fw", false, true, true);
        assert_eq!(anonymous, vec![Attempt::plain(Stage::Generic, "fw".into(), false)]);

        let hidden_sender = plan_attempts(&forwarded(2, "fw", None), "fw", false, false, true);
        assert_eq!(hidden_sender.len(), 1);
        assert_eq!(hidden_sender[0].kind, AttemptKind::Plain);

        let rewritten = plan_attempts(&msg, "fw!", false, false, false);
        assert_eq!(rewritten.len(), 1);
        assert_eq!(rewritten[0].kind, AttemptKind::Plain);
        assert_eq!(rewritten[0].text, "fw!\n\n[Forwarded message]");
    }

    #[test]
    fn contact_plan_falls_back_to_card() {
        let mut msg = text_message(1, "card");
        msg.media = Some(Media::Contact(contact()));
        let plan = plan_attempts(&msg, "card", false, false, true);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].kind, AttemptKind::NativeContact(contact()));
        assert_eq!(plan[0].text, "card");
        assert_eq!(plan[1].text, "card\n\nContact: Ann \nPhone: +1");
    }

    #[tokio::test]
    async fn replies_are_translated() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let first = engine.process(&text_message(1, "root")).await.unwrap();
        let mut reply = text_message(2, "child");
        reply.reply_to = Some(1);
        engine.process(&reply).await.unwrap();
        let mut orphan = text_message(3, "orphan");
        orphan.reply_to = Some(99);
        engine.process(&orphan).await.unwrap();

        let delivered = platform.delivered();
        assert_eq!(delivered[1].reply_to, Some(first.id));
        assert_eq!(delivered[2].reply_to, None);
        assert_eq!(engine.stats().text_only, 3);
    }

    #[tokio::test]
    async fn same_message_is_sent_once() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let msg = text_message(1, "once");
        assert!(engine.process(&msg).await.is_some());
        assert!(engine.process(&msg).await.is_none());
        assert_eq!(platform.delivered().len(), 1);
        assert_eq!(engine.stats().cloned, 1);
        assert_eq!(engine.stats().skipped, 0);
    }

    #[tokio::test]
    async fn album_collapses_to_first_member() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        for id in [3, 1, 2] {
            let mut msg = text_message(id, "");
            msg.media = Some(Media::Photo);
            msg.album_id = Some(77);
            engine.process(&msg).await;
        }

        assert_eq!(platform.delivered().len(), 1);
        assert_eq!(engine.stats().skipped, 2);
        assert_eq!(engine.stats().albums, 1);
        assert_eq!(engine.stats().photos, 1);
    }

    #[tokio::test]
    async fn failing_poll_becomes_text() {
        let platform = Arc::new(
            ScriptedPlatform::new(Vec::new()).fail_when(|out| {
                matches!(out.payload, Some(Payload::Poll(_)))
                    .then(|| SendError::Other(anyhow::anyhow!("POLL_UNSUPPORTED")))
            }),
        );
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let mut msg = text_message(1, "vote");
        msg.media = Some(Media::Poll(poll()));
        assert!(engine.process(&msg).await.is_some());

        let delivered = platform.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, None);
        assert_eq!(delivered[0].text, "vote\n\nPoll: Q?\n- yes\n- no");
        assert_eq!(engine.stats().cloned, 1);
        assert_eq!(engine.stats().polls, 1);
        assert_eq!(engine.stats().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_then_retries() {
        let platform = Arc::new(
            ScriptedPlatform::new(Vec::new()).queue_error(SendError::RateLimited { seconds: 3 }),
        );
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let started = tokio::time::Instant::now();
        assert!(engine.process(&text_message(1, "hi")).await.is_some());
        assert!(started.elapsed() >= Duration::from_secs(3));

        assert_eq!(platform.attempts().len(), 2);
        assert_eq!(platform.delivered().len(), 1);
        assert_eq!(engine.stats().cloned, 1);
        assert_eq!(engine.stats().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limit_budget_fails_message() {
        let platform = Arc::new(
            ScriptedPlatform::new(Vec::new())
                .fail_when(|_| Some(SendError::RateLimited { seconds: 1 })),
        );
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        assert!(engine.process(&text_message(1, "hi")).await.is_none());
        assert_eq!(platform.attempts().len(), 6);
        assert_eq!(engine.stats().failed, 1);
    }

    #[tokio::test]
    async fn permission_denied_is_terminal() {
        let platform = Arc::new(
            ScriptedPlatform::new(Vec::new())
                .fail_when(|_| Some(SendError::PermissionDenied("CHAT_WRITE_FORBIDDEN".into()))),
        );
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        assert!(engine.process(&video(1, "clip")).await.is_none());
        assert_eq!(platform.attempts().len(), 1);
        assert_eq!(engine.stats().failed, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn media_dropped_when_upload_fails() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()).fail_when(|out| {
            out.attachment
                .is_some()
                .then(|| SendError::Other(anyhow::anyhow!("upload failed")))
        }));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        assert!(engine.process(&video(1, "clip")).await.is_some());
        let delivered = platform.delivered();
        assert_eq!(delivered[0].text, "clip\n\n[Media could not be sent]");
        assert_eq!(engine.stats().videos, 1);
        assert_eq!(engine.stats().text_only, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn download_failure_sends_text_only() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()).fail_downloads());
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        assert!(engine.process(&video(1, "clip")).await.is_some());
        let delivered = platform.delivered();
        assert_eq!(delivered[0].attachment, None);
        assert_eq!(delivered[0].text, "clip");
    }

    #[tokio::test]
    async fn unresolvable_forward_sender_is_annotated() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()).fail_forward_resolution());
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let msg = forwarded(1, "news", Some(PeerKey::Channel(9)));
        assert!(engine.process(&msg).await.is_some());

        let delivered = platform.delivered();
        assert_eq!(delivered[0].text, "news\n\n[Forwarded message]");
        assert_eq!(delivered[0].payload, None);
        assert_eq!(engine.stats().forwards, 1);
        assert_eq!(engine.stats().text_only, 0);
    }

    #[tokio::test]
    async fn attributed_forward_carries_origin() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let msg = forwarded(4, "news", Some(PeerKey::Channel(9)));
        assert!(engine.process(&msg).await.is_some());

        let delivered = platform.delivered();
        match &delivered[0].payload {
            Some(Payload::Forward {
                source_message_id,
                sender,
            }) => {
                assert_eq!(*source_message_id, 4);
                assert_eq!(sender.peer, PeerKey::Channel(9));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(engine.stats().forwards, 1);
    }

    #[tokio::test]
    async fn rewritten_forward_is_sent_as_annotated_text() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = DispatchEngine::new(
            platform.clone(),
            TextTransformer::new(Vec::new(), true, None).unwrap(),
            ContentFilter::allow_all(),
            MediaStash::new(dir.path()),
            DispatchConfig::default(),
        );

        let msg = forwarded(7, "see https://x.co", Some(PeerKey::Channel(9)));
        assert!(engine.process(&msg).await.is_some());

        let attempts = platform.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].payload, None);
        assert_eq!(attempts[0].text, "see\n\n[Forwarded message]");
        assert_eq!(engine.stats().forwards, 1);
    }

    #[tokio::test]
    async fn forward_replying_to_cloned_message_keeps_reply() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let root = engine.process(&text_message(5, "root")).await.unwrap();
        let mut msg = forwarded(7, "news", Some(PeerKey::Channel(9)));
        msg.reply_to = Some(5);
        assert!(engine.process(&msg).await.is_some());

        let delivered = platform.delivered();
        assert_eq!(delivered[1].payload, None);
        assert_eq!(delivered[1].reply_to, Some(root.id));
        assert_eq!(delivered[1].text, "news\n\n[Forwarded message]");
    }

    #[tokio::test]
    async fn failing_contact_becomes_text() {
        let platform = Arc::new(
            ScriptedPlatform::new(Vec::new()).fail_when(|out| {
                matches!(out.payload, Some(Payload::Contact(_)))
                    .then(|| SendError::Other(anyhow::anyhow!("MEDIA_INVALID")))
            }),
        );
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let mut msg = text_message(1, "card");
        msg.media = Some(Media::Contact(contact()));
        assert!(engine.process(&msg).await.is_some());

        let delivered = platform.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, None);
        assert_eq!(delivered[0].text, "card\n\nContact: Ann \nPhone: +1");
        assert_eq!(engine.stats().cloned, 1);
        assert_eq!(engine.stats().contacts, 1);
        assert_eq!(engine.stats().failed, 0);
    }

    #[tokio::test]
    async fn denied_contact_does_not_fall_back() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()).fail_when(|out| {
            matches!(out.payload, Some(Payload::Contact(_)))
                .then(|| SendError::PermissionDenied("CHAT_WRITE_FORBIDDEN".into()))
        }));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let mut msg = text_message(1, "card");
        msg.media = Some(Media::Contact(contact()));
        assert!(engine.process(&msg).await.is_none());

        assert_eq!(platform.attempts().len(), 1);
        assert!(platform.delivered().is_empty());
        assert_eq!(engine.stats().failed, 1);
        assert_eq!(engine.stats().cloned, 0);
    }

    #[tokio::test]
    async fn failed_forward_with_media_ends_as_plain_text() {
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()).fail_when(|out| {
            (out.attachment.is_some() || matches!(out.payload, Some(Payload::Forward { .. })))
                .then(|| SendError::Other(anyhow::anyhow!("FILE_PART_INVALID")))
        }));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let mut msg = video(3, "clip");
        msg.forward = Some(ForwardOrigin {
            sender: Some(PeerKey::User(5)),
            channel_post: None,
            from_name: None,
        });
        assert!(engine.process(&msg).await.is_some());

        let attempts = platform.attempts();
        assert_eq!(attempts.len(), 3);
        assert!(matches!(attempts[0].payload, Some(Payload::Forward { .. })));
        assert!(attempts[1].attachment.is_some());

        let delivered = platform.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].attachment, None);
        assert_eq!(
            delivered[0].text,
            "clip\n\n[Forwarded message]\n\n[Media could not be sent]"
        );
        assert_eq!(engine.stats().cloned, 1);
        assert_eq!(engine.stats().forwards, 1);
        assert_eq!(engine.stats().text_only, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_in_fallback_restarts_plan() {
        let limited = std::sync::atomic::AtomicBool::new(false);
        let platform = Arc::new(ScriptedPlatform::new(Vec::new()).fail_when(move |out| {
            if matches!(out.payload, Some(Payload::Poll(_))) {
                return Some(SendError::Other(anyhow::anyhow!("POLL_UNSUPPORTED")));
            }
            (!limited.swap(true, std::sync::atomic::Ordering::SeqCst))
                .then_some(SendError::RateLimited { seconds: 2 })
        }));
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(platform.clone(), dir.path());

        let mut msg = text_message(1, "vote");
        msg.media = Some(Media::Poll(poll()));
        let started = tokio::time::Instant::now();
        assert!(engine.process(&msg).await.is_some());
        assert!(started.elapsed() >= Duration::from_secs(2));

        let attempts = platform.attempts();
        assert_eq!(attempts.len(), 4);
        assert!(matches!(attempts[0].payload, Some(Payload::Poll(_))));
        assert_eq!(attempts[1].payload, None);
        assert!(matches!(attempts[2].payload, Some(Payload::Poll(_))));
        assert_eq!(attempts[3].text, "vote\n\nPoll: Q?\n- yes\n- no");
        assert_eq!(engine.stats().cloned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cuts_rate_limit_wait_short() {
        let platform = Arc::new(
            ScriptedPlatform::new(Vec::new())
                .queue_error(SendError::RateLimited { seconds: 3000 }),
        );
        let dir = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let mut engine = engine_with(platform.clone(), dir.path()).with_shutdown(shutdown.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.cancel();
        });

        let started = tokio::time::Instant::now();
        assert!(engine.process(&text_message(1, "hi")).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(3000));
        assert_eq!(platform.attempts().len(), 1);
        assert_eq!(engine.stats().failed, 1);
    }
}
