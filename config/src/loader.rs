use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::validate::validate_config;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplacementPair {
    pub pattern: String,
    pub replacement: String,
}

/// 各内容类型的克隆开关，默认全部开启
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneToggles {
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

impl Default for CloneToggles {
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

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub session_name: String,
    pub source: String,
    pub destination: String,

    pub max_messages: usize,
    pub delay_between_messages: f64,
    pub start_from_message_id: i32,
    pub end_at_message_id: i32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    pub replace_text: bool,
    pub text_replacements: Vec<ReplacementPair>,
    pub remove_urls: bool,
    pub add_source_link: bool,
    pub anonymize_forwards: bool,

    pub clone: CloneToggles,
    pub min_message_length: usize,
    pub max_message_length: usize,
    pub message_contains: Vec<String>,
    pub message_not_contains: Vec<String>,
    pub blacklisted_users: Vec<String>,

    pub flood_wait_max_retries: usize,
    pub flood_wait_max_total_wait: u64,

    pub download_dir: PathBuf,
    pub log_file: PathBuf,
    pub log_level: String,
}

fn default_session_name() -> String {
    "cloner_session".to_string()
}
fn default_delay() -> f64 {
    2.0
}
fn default_flood_wait_max_retries() -> usize {
    5
}
fn default_flood_wait_max_total_wait() -> u64 {
    3600
}
fn default_log_level() -> String {
    "INFO".to_string()
}

pub fn project_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// 相对路径以 `root` 为基准，空值回退到 `default`
pub fn resolve_path(root: &Path, raw: &str, default: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() {
        return root.join(default);
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

pub fn load_config() -> Result<AppConfig> {
    let root = project_root();
    let env_path = root.join(".env");
    if env_path.exists() {
        dotenv::from_path(&env_path)?;
    }

    let config = build_config(&root, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// 从键值来源构建配置，`lookup` 通常为环境变量
pub fn build_config<F>(root: &Path, lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string());
    let text = |key: &str| get(key).unwrap_or_default();

    let api_id = text("API_ID")
        .parse::<i32>()
        .context("API_ID 必须为整数")?;
    let api_hash = get("API_HASH").context("请设置 API_HASH")?;
    let source = get("SOURCE_ENTITY").context("请设置 SOURCE_ENTITY")?;
    let destination = get("DESTINATION_ENTITY").context("请设置 DESTINATION_ENTITY")?;
    let session_name = get("SESSION_NAME")
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default_session_name);

    let start_date = parse_date(&text("START_DATE")).context("START_DATE 格式应为 YYYY-MM-DD")?;
    let end_date = parse_date(&text("END_DATE")).context("END_DATE 格式应为 YYYY-MM-DD")?;

    let mut text_replacements = parse_replacements(&text("TEXT_REPLACEMENTS"));
    let replacement_file = text("TEXT_REPLACEMENTS_FILE");
    if !replacement_file.is_empty() {
        let path = resolve_path(root, &replacement_file, "replacements.json");
        for pair in load_replacement_file(&path)? {
            upsert_replacement(&mut text_replacements, pair);
        }
    }

    let clone = CloneToggles {
        photos: parse_bool(get("CLONE_PHOTOS"), true),
        videos: parse_bool(get("CLONE_VIDEOS"), true),
        files: parse_bool(get("CLONE_FILES"), true),
        voices: parse_bool(get("CLONE_VOICES"), true),
        music: parse_bool(get("CLONE_MUSIC"), true),
        gifs: parse_bool(get("CLONE_GIFS"), true),
        stickers: parse_bool(get("CLONE_STICKERS"), true),
        polls: parse_bool(get("CLONE_POLLS"), true),
        contacts: parse_bool(get("CLONE_CONTACTS"), true),
        albums: parse_bool(get("CLONE_ALBUMS"), true),
        forwards: parse_bool(get("CLONE_FORWARDS"), true),
    };

    let delay_between_messages = parse_or(get("DELAY_BETWEEN_MESSAGES"), default_delay());
    tracing::info!("已加载 DELAY_BETWEEN_MESSAGES: {} 秒", delay_between_messages);

    Ok(AppConfig {
        api_id,
        api_hash,
        session_name,
        source,
        destination,
        max_messages: parse_or(get("MAX_MESSAGES"), 0),
        delay_between_messages,
        start_from_message_id: parse_or(get("START_FROM_MESSAGE_ID"), 0),
        end_at_message_id: parse_or(get("END_AT_MESSAGE_ID"), 0),
        start_date,
        end_date,
        replace_text: parse_bool(get("REPLACE_TEXT"), false),
        text_replacements,
        remove_urls: parse_bool(get("REMOVE_URLS"), false),
        add_source_link: parse_bool(get("ADD_SOURCE_LINK"), false),
        anonymize_forwards: parse_bool(get("ANONYMIZE_FORWARDS"), false),
        clone,
        min_message_length: parse_or(get("MIN_MESSAGE_LENGTH"), 0),
        max_message_length: parse_or(get("MAX_MESSAGE_LENGTH"), 0),
        message_contains: parse_list(&text("MESSAGE_CONTAINS")),
        message_not_contains: parse_list(&text("MESSAGE_NOT_CONTAINS")),
        blacklisted_users: parse_list(&text("BLACKLISTED_USERS")),
        flood_wait_max_retries: parse_or(
            get("FLOOD_WAIT_MAX_RETRIES"),
            default_flood_wait_max_retries(),
        ),
        flood_wait_max_total_wait: parse_or(
            get("FLOOD_WAIT_MAX_TOTAL_WAIT"),
            default_flood_wait_max_total_wait(),
        ),
        download_dir: resolve_path(root, &text("DOWNLOAD_DIR"), "downloads"),
        log_file: resolve_path(root, &text("LOG_FILE"), "telegram_cloner.log"),
        log_level: get("LOG_LEVEL")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_log_level),
    })
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(v) if !v.is_empty() => {
            matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
        }
        _ => default,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_date(raw: &str) -> Result<Option<NaiveDate>> {
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d")?))
}

/// `旧:新,旧2:新2`，按出现顺序保存；重复的键覆盖原位置的值
pub fn parse_replacements(raw: &str) -> Vec<ReplacementPair> {
    let mut pairs = Vec::new();
    for item in raw.split(',') {
        let Some((pattern, replacement)) = item.split_once(':') else {
            continue;
        };
        upsert_replacement(
            &mut pairs,
            ReplacementPair {
                pattern: pattern.trim().to_string(),
                replacement: replacement.trim().to_string(),
            },
        );
    }
    pairs
}

fn upsert_replacement(pairs: &mut Vec<ReplacementPair>, pair: ReplacementPair) {
    if pair.pattern.is_empty() {
        return;
    }
    match pairs.iter_mut().find(|p| p.pattern == pair.pattern) {
        Some(existing) => existing.replacement = pair.replacement,
        None => pairs.push(pair),
    }
}

fn load_replacement_file(path: &Path) -> Result<Vec<ReplacementPair>> {
    if !path.exists() {
        tracing::warn!("替换规则文件不存在: {:?}", path);
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("无法读取替换规则文件: {:?}", path))?;
    let pairs: Vec<ReplacementPair> = serde_json::from_str(&content)
        .with_context(|| format!("替换规则文件格式错误: {:?}", path))?;
    tracing::info!("替换规则已加载: count={}", pairs.len());
    Ok(pairs)
}
