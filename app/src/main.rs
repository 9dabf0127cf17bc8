use anyhow::Result;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::time::delay_from_secs;
use config::{load_config, AppConfig, CloneToggles};
use storage::MediaStash;
use tdlib::{GrammersPlatform, TdlibClient};
use tg_core::{
    ContentFilter, DispatchConfig, DispatchEngine, DriverConfig, FetchRange, FilterRules,
    FloodWaitPolicy, KindToggles, Replacement, Replicator, RunOutcome, SourceLink,
    TextTransformer,
};

const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("配置错误: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    // guard 活到 main 结束，退出前刷出日志文件
    let _log_guard = match logging::init(&config.log_file, &config.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("无法初始化日志: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建运行时: {}", e);
            eprintln!("无法创建运行时: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(RunOutcome::Completed) => ExitCode::SUCCESS,
        Ok(RunOutcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            error!("克隆失败: {:#}", e);
            eprintln!("克隆失败: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<RunOutcome> {
    info!("启动克隆: {} -> {}", config.source, config.destination);

    let shutdown = CancellationToken::new();
    spawn_interrupt_watcher(shutdown.clone());

    let client = Arc::new(
        TdlibClient::connect(config.api_id, &config.api_hash, &config.session_name).await?,
    );
    if let Err(e) = client.authorize().await {
        client.disconnect();
        return Err(e);
    }

    let platform =
        match GrammersPlatform::open(client.clone(), &config.source, &config.destination).await {
            Ok(platform) => Arc::new(platform),
            Err(e) => {
                client.disconnect();
                return Err(e);
            }
        };

    let source_link = if config.add_source_link {
        let link = SourceLink::from_chat(platform.source_info());
        if link.is_none() {
            warn!("源会话没有公开用户名，不添加来源署名");
        }
        link
    } else {
        None
    };

    let transformer = TextTransformer::new(replacements(&config), config.remove_urls, source_link)?;
    let filter = ContentFilter::new(filter_rules(&config));
    let stash = MediaStash::new(&config.download_dir);
    let engine = DispatchEngine::new(
        platform.clone(),
        transformer,
        filter,
        stash.clone(),
        DispatchConfig {
            anonymize_forwards: config.anonymize_forwards,
            flood_wait: FloodWaitPolicy {
                max_retries: config.flood_wait_max_retries,
                max_total_wait: std::time::Duration::from_secs(config.flood_wait_max_total_wait),
            },
        },
    );

    let mut replicator = Replicator::new(
        platform,
        engine,
        stash,
        driver_config(&config),
        shutdown,
    );
    let outcome = replicator.run().await;

    let report = replicator.stats().to_string();
    info!("克隆结束\n{}", report);
    println!("{}", report);

    if matches!(outcome, Ok(RunOutcome::Interrupted)) {
        warn!("克隆被用户中断");
    }
    outcome
}

/// Ctrl-C 触发取消信号：等待点立即返回，当前消息结束后收尾并输出报告
fn spawn_interrupt_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = signal::ctrl_c().await {
                warn!("无法监听退出信号: {}", e);
                return;
            }
            if shutdown.is_cancelled() {
                warn!("正在清理并输出报告，请稍候");
            } else {
                warn!("收到退出信号，当前消息处理完后停止");
                shutdown.cancel();
            }
        }
    });
}

fn replacements(config: &AppConfig) -> Vec<Replacement> {
    if !config.replace_text {
        return Vec::new();
    }
    config
        .text_replacements
        .iter()
        .map(|pair| Replacement::new(pair.pattern.as_str(), pair.replacement.as_str()))
        .collect()
}

fn kind_toggles(clone: &CloneToggles) -> KindToggles {
    KindToggles {
        photos: clone.photos,
        videos: clone.videos,
        files: clone.files,
        voices: clone.voices,
        music: clone.music,
        gifs: clone.gifs,
        stickers: clone.stickers,
        polls: clone.polls,
        contacts: clone.contacts,
        albums: clone.albums,
        forwards: clone.forwards,
    }
}

fn filter_rules(config: &AppConfig) -> FilterRules {
    FilterRules {
        toggles: kind_toggles(&config.clone),
        min_length: config.min_message_length,
        max_length: config.max_message_length,
        contains: config.message_contains.clone(),
        not_contains: config.message_not_contains.clone(),
        blacklisted_senders: config.blacklisted_users.clone(),
    }
}

fn driver_config(config: &AppConfig) -> DriverConfig {
    DriverConfig {
        range: FetchRange {
            min_id: config.start_from_message_id,
            max_id: config.end_at_message_id,
            ..Default::default()
        },
        max_messages: config.max_messages,
        start_date: config.start_date,
        end_date: config.end_date,
        delay: delay_from_secs(config.delay_between_messages),
    }
}
