use anyhow::{anyhow, Context, Result};
use grammers_client::{
    grammers_tl_types as tl,
    types::{Media, Message, Peer},
    Client, SignInError,
};
use grammers_mtsender::{SenderPool, SenderPoolHandle};
use grammers_session::{
    defs::{PeerAuth, PeerId, PeerRef},
    storages::SqliteSession,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tg_core::{ChatInfo, ChatKind, FetchRange, PeerKey};
use tokio::{
    task::JoinHandle,
    time::{timeout, Duration},
};
use tracing::{error, info, warn};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(25);
const HISTORY_LOG_EVERY: usize = 100;
const HISTORY_PAGE: usize = 100;

#[derive(Clone)]
pub struct TdlibClient {
    client: Client,
    api_hash: String,
    pool_handle: SenderPoolHandle,
    _runner: Arc<RunnerGuard>,
}

struct RunnerGuard {
    handle: JoinHandle<()>,
}

impl Drop for RunnerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TdlibClient {
    pub async fn connect(api_id: i32, api_hash: &str, session_name: &str) -> Result<Self> {
        let session_file = session_file_name(session_name);
        let session = Arc::new(
            SqliteSession::open(&session_file)
                .with_context(|| format!("无法打开会话文件: {}", session_file))?,
        );
        let pool = SenderPool::new(session, api_id);
        let client = Client::new(&pool);
        let SenderPool {
            runner, handle, ..
        } = pool;

        let runner = tokio::spawn(async move {
            runner.run().await;
            warn!("SenderPool runner 已退出");
        });

        Ok(Self {
            client,
            api_hash: api_hash.to_string(),
            pool_handle: handle,
            _runner: Arc::new(RunnerGuard { handle: runner }),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn disconnect(&self) {
        self.pool_handle.quit();
        info!("已断开 Telegram 连接");
    }

    pub async fn authorize(&self) -> Result<()> {
        if self.client.is_authorized().await? {
            return Ok(());
        }

        let phone = prompt("请输入手机号（带国际区号，例如 +8613800138000）：").await?;
        info!("正在请求验证码，请稍候...");
        let token = timeout(
            LOGIN_TIMEOUT,
            self.client.request_login_code(&phone, &self.api_hash),
        )
        .await
        .context("请求验证码超时，请检查网络或代理")??;

        let code = prompt("请输入验证码：").await?;
        let sign_in = timeout(LOGIN_TIMEOUT, self.client.sign_in(&token, &code))
            .await
            .context("登录请求超时，请检查网络或代理")?;

        match sign_in {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(token)) => {
                let password = prompt("请输入二步验证密码：").await?;
                timeout(
                    LOGIN_TIMEOUT,
                    self.client
                        .check_password(token, password.as_bytes().to_vec()),
                )
                .await
                .context("二步验证超时，请检查网络或代理")??;
            }
            Err(e) => {
                error!("登录失败: {}", e);
                return Err(e.into());
            }
        }

        info!("登录成功");
        Ok(())
    }

    /// 支持 @username、t.me 链接与 Bot API 形式的会话 id
    pub async fn resolve_chat(&self, identifier: &str) -> Result<Peer> {
        let identifier = sanitize_identifier(identifier)?;

        if let Ok(dialog_id) = identifier.parse::<i64>() {
            let peer = self
                .client
                .resolve_peer(dialog_id_to_peer(dialog_id))
                .await
                .with_context(|| format!("无法解析会话 id: {}", dialog_id))?;
            return Ok(peer);
        }

        self.client
            .resolve_username(&identifier)
            .await?
            .ok_or_else(|| anyhow!("未找到用户或频道: {}", identifier))
    }

    pub async fn resolve_key(&self, key: PeerKey) -> Result<Peer> {
        let peer = self.client.resolve_peer(peer_key_ref(key)).await?;
        Ok(peer)
    }

    pub async fn download(&self, media: &Media, path: &Path, limit: Duration) -> Result<PathBuf> {
        timeout(limit, self.client.download_media(media, path))
            .await
            .map_err(|_| anyhow!("下载媒体超时: timeout={}s", limit.as_secs()))?
            .with_context(|| format!("下载媒体失败: {:?}", path))?;
        Ok(path.to_path_buf())
    }

    /// 从新到旧遍历 `range` 内的历史消息，返回扫描条数
    pub async fn scan_history<F>(&self, peer: PeerRef, range: FetchRange, mut visit: F) -> Result<usize>
    where
        F: FnMut(&Message),
    {
        let mut iter = self.client.iter_messages(peer);
        if range.max_id > 0 {
            iter = iter.offset_id(range.max_id.saturating_add(1));
        }

        let mut scanned = 0usize;
        while let Some(msg) = iter.next().await? {
            if range.min_id > 0 && msg.id() < range.min_id {
                break;
            }
            scanned += 1;
            if scanned % HISTORY_LOG_EVERY == 0 {
                info!("已扫描历史消息: {} 条", scanned);
            }
            visit(&msg);
        }

        Ok(scanned)
    }

    /// 从旧到新取 `range` 内最早的 `range.limit` 条普通消息，服务消息不计数
    pub async fn history_ascending(&self, peer: PeerRef, range: FetchRange) -> Result<Vec<Message>> {
        let input_peer: tl::enums::InputPeer = peer.into();
        let mut after = range.min_id.saturating_sub(1).max(0);
        let mut ids = Vec::new();

        while ids.len() < range.limit {
            let batch = (range.limit - ids.len()).min(HISTORY_PAGE) as i32;
            let response = self
                .client
                .invoke(&tl::functions::messages::GetHistory {
                    peer: input_peer.clone(),
                    offset_id: after + 1,
                    offset_date: 0,
                    add_offset: -batch,
                    limit: batch,
                    max_id: 0,
                    min_id: 0,
                    hash: 0,
                })
                .await
                .context("拉取历史消息失败")?;

            let Some(page) = ascending_page(page_entries(response), after, range.max_id) else {
                break;
            };
            after = page.newest;
            ids.extend(page.regular);
            info!("已扫描历史消息: {} 条", ids.len());
            if range.max_id > 0 && after >= range.max_id {
                break;
            }
        }
        ids.truncate(range.limit);

        let mut messages = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(HISTORY_PAGE) {
            let fetched = self.client.get_messages_by_id(peer, chunk).await?;
            messages.extend(fetched.into_iter().flatten());
        }
        Ok(messages)
    }

    pub async fn message_by_id(&self, peer: PeerRef, id: i32) -> Result<Option<Message>> {
        let messages = self.client.get_messages_by_id(peer, &[id]).await?;
        Ok(messages.into_iter().flatten().next())
    }
}

/// (id, 是否普通消息)
fn page_entries(response: tl::enums::messages::Messages) -> Vec<(i32, bool)> {
    let messages = match response {
        tl::enums::messages::Messages::Messages(m) => m.messages,
        tl::enums::messages::Messages::Slice(m) => m.messages,
        tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
        tl::enums::messages::Messages::NotModified(_) => Vec::new(),
    };
    messages
        .into_iter()
        .map(|msg| match msg {
            tl::enums::Message::Message(m) => (m.id, true),
            tl::enums::Message::Service(m) => (m.id, false),
            tl::enums::Message::Empty(m) => (m.id, false),
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
struct HistoryPage {
    regular: Vec<i32>,
    newest: i32,
}

/// 只保留 `after` 之后、`max_id` 以内的消息；没有前进时返回 None
fn ascending_page(entries: Vec<(i32, bool)>, after: i32, max_id: i32) -> Option<HistoryPage> {
    let in_range: Vec<(i32, bool)> = entries
        .into_iter()
        .filter(|&(id, _)| id > after && (max_id <= 0 || id <= max_id))
        .collect();
    let newest = in_range.iter().map(|&(id, _)| id).max()?;

    let mut regular: Vec<i32> = in_range
        .into_iter()
        .filter_map(|(id, regular)| regular.then_some(id))
        .collect();
    regular.sort_unstable();
    regular.dedup();
    Some(HistoryPage { regular, newest })
}

pub fn chat_info(peer: &Peer) -> ChatInfo {
    let kind = match peer {
        Peer::User(_) => ChatKind::User,
        Peer::Group(_) => ChatKind::Group,
        Peer::Channel(_) => ChatKind::Channel,
    };
    ChatInfo {
        id: peer.id().bot_api_dialog_id(),
        title: peer.name().unwrap_or_default().to_string(),
        username: peer.username().map(str::to_string),
        kind,
    }
}

/// 单线程运行时不能使用 block_in_place，读取终端输入放到阻塞线程池
async fn prompt(label: &'static str) -> Result<String> {
    let input = tokio::task::spawn_blocking(move || {
        println!("{}", label);
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        Ok::<String, std::io::Error>(input.trim().to_string())
    })
    .await
    .context("读取终端输入失败")??;
    Ok(input)
}

fn session_file_name(session_name: &str) -> String {
    if session_name.ends_with(".session") {
        session_name.to_string()
    } else {
        format!("{}.session", session_name)
    }
}

/// 去掉 @ 与 t.me 前缀；私有邀请链接无法解析为会话
pub fn sanitize_identifier(raw: &str) -> Result<String> {
    let mut value = raw.trim();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = value.strip_prefix(prefix) {
            value = rest;
        }
    }
    for prefix in ["www.t.me/", "t.me/", "telegram.me/"] {
        if let Some(rest) = value.strip_prefix(prefix) {
            if rest.starts_with('+') || rest.starts_with("joinchat/") {
                anyhow::bail!("不支持私有邀请链接: {}", raw);
            }
            value = rest.split(['/', '?']).next().unwrap_or_default();
        }
    }
    let value = value.trim_start_matches('@');
    if value.is_empty() {
        anyhow::bail!("会话标识为空: {:?}", raw);
    }
    Ok(value.to_string())
}

pub(crate) fn dialog_id_to_peer(dialog_id: i64) -> PeerRef {
    let id = if dialog_id <= -1_000_000_000_000 {
        PeerId::channel(-dialog_id - 1_000_000_000_000)
    } else if dialog_id < 0 {
        PeerId::chat(-dialog_id)
    } else {
        PeerId::user(dialog_id)
    };
    PeerRef {
        id,
        auth: PeerAuth::default(),
    }
}

pub(crate) fn peer_key_ref(key: PeerKey) -> PeerRef {
    let id = match key {
        PeerKey::User(id) => PeerId::user(id),
        PeerKey::Chat(id) => PeerId::chat(id),
        PeerKey::Channel(id) => PeerId::channel(id),
    };
    PeerRef {
        id,
        auth: PeerAuth::default(),
    }
}

pub(crate) fn peer_key(peer: &tl::enums::Peer) -> PeerKey {
    match peer {
        tl::enums::Peer::User(u) => PeerKey::User(u.user_id),
        tl::enums::Peer::Chat(c) => PeerKey::Chat(c.chat_id),
        tl::enums::Peer::Channel(c) => PeerKey::Channel(c.channel_id),
    }
}
