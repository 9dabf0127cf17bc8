use super::dispatch::DispatchEngine;
use super::model::SourceMessage;
use super::platform::{FetchRange, Platform};
use super::stats::ReplicationStats;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use storage::MediaStash;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    pub range: FetchRange,
    /// 0 表示不限
    pub max_messages: usize,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// 一次性克隆任务：拉取历史、按序逐条分发、汇总统计
///
/// 无论正常结束、出错还是被中断，`run` 返回前都会清空媒体目录并断开平台连接。
pub struct Replicator {
    platform: Arc<dyn Platform>,
    engine: DispatchEngine,
    stash: MediaStash,
    config: DriverConfig,
    shutdown: CancellationToken,
}

impl Replicator {
    pub fn new(
        platform: Arc<dyn Platform>,
        engine: DispatchEngine,
        stash: MediaStash,
        config: DriverConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            platform,
            engine: engine.with_shutdown(shutdown.clone()),
            stash,
            config,
            shutdown,
        }
    }

    pub fn stats(&self) -> &ReplicationStats {
        self.engine.stats()
    }

    pub async fn run(&mut self) -> Result<RunOutcome> {
        let result = self.replicate().await;
        self.cleanup().await;
        result
    }

    async fn replicate(&mut self) -> Result<RunOutcome> {
        self.stash.prepare()?;
        if self.interrupted() {
            return Ok(RunOutcome::Interrupted);
        }

        let messages = tokio::select! {
            fetched = self.fetch() => fetched?,
            _ = self.shutdown.cancelled() => {
                warn!("获取历史消息时收到中断信号");
                return Ok(RunOutcome::Interrupted);
            }
        };
        let total = messages.len();
        self.engine.stats_mut().total = total;
        if messages.is_empty() {
            warn!("没有找到需要克隆的消息");
            return Ok(RunOutcome::Completed);
        }

        info!("开始克隆 {} 条消息", total);
        for (index, msg) in messages.iter().enumerate() {
            if index > 0 && !self.config.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.delay) => {}
                    _ = self.shutdown.cancelled() => {}
                }
            }
            if self.interrupted() {
                warn!("收到中断信号，停止克隆");
                log_progress(index, total);
                return Ok(RunOutcome::Interrupted);
            }

            self.engine.process(msg).await;

            let done = index + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                log_progress(done, total);
            }
            if self.interrupted() {
                warn!("收到中断信号，停止克隆");
                return Ok(RunOutcome::Interrupted);
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// 拉取并整理消息：按 id 升序去重，再应用日期窗口与数量上限
    pub async fn fetch(&self) -> Result<Vec<SourceMessage>> {
        let window = DateWindow::new(self.config.start_date, self.config.end_date);
        // 日期窗口在拉取之后才生效，此时不能让平台提前截断
        let limit = if window.is_open() {
            self.config.max_messages
        } else {
            0
        };
        let range = FetchRange {
            limit,
            ..self.config.range
        };
        info!(
            "获取历史消息: min_id={} max_id={} limit={}",
            range.min_id, range.max_id, self.config.max_messages
        );
        let mut messages = self
            .platform
            .fetch_history(range)
            .await
            .context("获取历史消息失败")?;

        messages.sort_by_key(|m| m.id);
        messages.dedup_by_key(|m| m.id);
        messages.retain(|m| window.contains(m.date));

        if self.config.max_messages > 0 {
            messages.truncate(self.config.max_messages);
        }

        info!("共获取 {} 条消息", messages.len());
        Ok(messages)
    }

    fn interrupted(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn cleanup(&self) {
        match self.stash.clear() {
            Ok(0) => {}
            Ok(removed) => info!("已清理媒体文件: {} 个", removed),
            Err(e) => warn!("清理媒体目录失败: {:#}", e),
        }
        self.platform.disconnect().await;
    }
}

fn log_progress(done: usize, total: usize) {
    let percent = if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    };
    info!("进度: {:.1}% ({}/{})", percent, done, total);
}

/// 起始日当天零点（含）到结束日次日零点（不含），按 UTC 计
#[derive(Debug, Clone, Copy)]
struct DateWindow {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl DateWindow {
    fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        let midnight = |date: NaiveDate| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        Self {
            start: start.map(midnight),
            end: end.and_then(|d| d.succ_opt()).map(midnight),
        }
    }

    fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    fn contains(&self, date: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date < end)
    }
}
