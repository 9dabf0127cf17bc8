use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub type LogGuard = WorkerGuard;

/// 兼容 `WARNING` / `CRITICAL` 等写法，统一为 tracing 级别名
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        _ => "info",
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(normalize_level(level));
        for directive in [
            "grammers_mtsender=warn",
            "grammers_mtproto=warn",
            "grammers_session=warn",
            "grammers_client=warn",
        ] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    })
}

/// 同时输出到终端与日志文件（追加写入）
///
/// 返回的 guard 由调用方持有，drop 时刷出文件缓冲
pub fn init(log_file: &Path, level: &str) -> Result<LogGuard> {
    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建日志目录: {:?}", parent))?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("无法打开日志文件: {:?}", log_file))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_target(true).with_writer(std::io::stdout))
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .try_init()
        .context("日志系统已被初始化")?;

    Ok(guard)
}
