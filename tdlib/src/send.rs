use super::convert::entity_to_tl;
use anyhow::anyhow;
use common::text::truncate_text;
use grammers_client::{grammers_tl_types as tl, types::InputMessage, Client, InvocationError};
use grammers_session::defs::PeerRef;
use std::time::Duration;
use tg_core::{
    Attachment, Contact, ContentKind, OutgoingMessage, Payload, Poll, SendError, SentMessage,
};
use tracing::{debug, info};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const RATE_LIMIT_ERRORS: [&str; 3] = ["FLOOD_WAIT", "SLOWMODE_WAIT", "FLOOD_PREMIUM_WAIT"];
const PERMISSION_ERRORS: [&str; 3] = [
    "CHAT_WRITE_FORBIDDEN",
    "CHAT_ADMIN_REQUIRED",
    "USER_BANNED_IN_CHANNEL",
];

/// 单次发送请求；重试与降级由上层的分发引擎负责
pub struct MessageSender {
    client: Client,
    source: PeerRef,
    destination: PeerRef,
    request_timeout: Duration,
}

impl MessageSender {
    pub fn new(client: Client, source: PeerRef, destination: PeerRef) -> Self {
        Self {
            client,
            source,
            destination,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage, SendError> {
        if let Some(source_message_id) = forward_request(message)? {
            return self.forward(source_message_id).await;
        }

        info!(
            "发送消息: chat_id={} 长度={} 附件={} 内容预览=\"{}\"",
            self.destination.id.bot_api_dialog_id(),
            message.text.chars().count(),
            message
                .attachment
                .as_ref()
                .map(|a| a.kind.label())
                .unwrap_or("无"),
            truncate_text(&message.text, 120)
        );

        let mut input = InputMessage::new()
            .text(message.text.as_str())
            .reply_to(message.reply_to);
        if !message.entities.is_empty() {
            let entities = message
                .entities
                .iter()
                .filter_map(entity_to_tl)
                .collect::<Vec<_>>();
            input = input.fmt_entities(entities);
        }

        input = match &message.payload {
            Some(Payload::Poll(poll)) => input.media(poll_media(poll)),
            Some(Payload::Contact(contact)) => input.media(contact_media(contact)),
            _ => match &message.attachment {
                Some(attachment) => self.attach(input, attachment).await?,
                None => input,
            },
        };

        let sent = tokio::time::timeout(
            self.request_timeout,
            self.client.send_message(self.destination, input),
        )
        .await
        .map_err(|_| self.timed_out("发送消息"))?
        .map_err(map_invocation_error)?;

        debug!("发送完成: message_id={}", sent.id());
        Ok(SentMessage { id: sent.id() })
    }

    async fn attach(
        &self,
        input: InputMessage,
        attachment: &Attachment,
    ) -> Result<InputMessage, SendError> {
        let uploaded = tokio::time::timeout(
            self.request_timeout,
            self.client.upload_file(&attachment.path),
        )
        .await
        .map_err(|_| self.timed_out("上传媒体"))?
        .map_err(|e| anyhow!("上传媒体失败: {:?}: {}", attachment.path, e))?;

        Ok(match attachment.kind {
            ContentKind::Photo => input.photo(uploaded),
            _ => input.document(uploaded),
        })
    }

    async fn forward(&self, source_message_id: i32) -> Result<SentMessage, SendError> {
        let forwarded = tokio::time::timeout(
            self.request_timeout,
            self.client
                .forward_messages(self.destination, &[source_message_id], self.source),
        )
        .await
        .map_err(|_| self.timed_out("转发消息"))?
        .map_err(map_invocation_error)?;

        forwarded
            .into_iter()
            .flatten()
            .next()
            .map(|msg| SentMessage { id: msg.id() })
            .ok_or_else(|| SendError::Other(anyhow!("转发未返回消息: source_id={}", source_message_id)))
    }

    fn timed_out(&self, action: &str) -> SendError {
        SendError::Other(anyhow!(
            "{}请求超时: timeout={}s",
            action,
            self.request_timeout.as_secs()
        ))
    }
}

/// 转发只能原样搬运消息，带回复关系的转发交回上层降级
fn forward_request(message: &OutgoingMessage) -> Result<Option<i32>, SendError> {
    let Some(Payload::Forward {
        source_message_id,
        sender,
    }) = &message.payload
    else {
        return Ok(None);
    };
    if message.reply_to.is_some() {
        return Err(SendError::Other(anyhow!(
            "转发无法保留回复关系: source_id={}",
            source_message_id
        )));
    }
    info!(
        "转发原消息: source_id={} 原作者=\"{}\"",
        source_message_id, sender.name
    );
    Ok(Some(*source_message_id))
}

pub fn map_invocation_error(error: InvocationError) -> SendError {
    if let InvocationError::Rpc(rpc) = &error {
        if let Some(seconds) = rate_limit_seconds(&rpc.name, rpc.value) {
            return SendError::RateLimited { seconds };
        }
        if is_permission_error(&rpc.name) {
            return SendError::PermissionDenied(rpc.name.clone());
        }
    }
    SendError::Other(error.into())
}

/// 限流类错误返回需要等待的秒数，服务端未给出时按 1 秒处理
pub fn rate_limit_seconds(name: &str, value: Option<u32>) -> Option<u64> {
    RATE_LIMIT_ERRORS
        .contains(&name)
        .then(|| u64::from(value.unwrap_or(1)))
}

pub fn is_permission_error(name: &str) -> bool {
    PERMISSION_ERRORS.contains(&name)
}

fn text_with_entities(text: &str) -> tl::enums::TextWithEntities {
    tl::types::TextWithEntities {
        text: text.to_string(),
        entities: Vec::new(),
    }
    .into()
}

fn poll_media(poll: &Poll) -> tl::enums::InputMedia {
    let answers = poll
        .answers
        .iter()
        .map(|answer| {
            tl::types::PollAnswer {
                text: text_with_entities(&answer.text),
                option: answer.option.clone(),
            }
            .into()
        })
        .collect();

    tl::types::InputMediaPoll {
        poll: tl::types::Poll {
            id: 0,
            closed: poll.closed,
            public_voters: poll.public_voters,
            multiple_choice: poll.multiple_choice,
            quiz: poll.quiz,
            question: text_with_entities(&poll.question),
            answers,
            close_period: None,
            close_date: None,
        }
        .into(),
        correct_answers: None,
        solution: None,
        solution_entities: None,
    }
    .into()
}

fn contact_media(contact: &Contact) -> tl::enums::InputMedia {
    tl::types::InputMediaContact {
        phone_number: contact.phone_number.clone(),
        first_name: contact.first_name.clone(),
        last_name: contact.last_name.clone(),
        vcard: contact.vcard.clone(),
    }
    .into()
}
