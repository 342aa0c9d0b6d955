use anyhow::Context;
use bulkcopier_lib::config::{AppConfig, CONFIG_FILE};
use bulkcopier_lib::logging::{LogConfig, SizeRotatingWriter};
use bulkcopier_lib::{
    create_service, LogStatistics, LogStore, RetryPass, Selection, TransferConfig, TransferEngine,
    TransferEvent,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "bulkcopier", version, about = "Copy workbooks between projects in batches")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 复制源项目中的资产到目标项目
    Copy {
        #[command(flatten)]
        projects: Projects,
        /// 只复制指定名称的资产，可重复
        #[arg(short, long = "asset")]
        assets: Vec<String>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        retry_limit: Option<u32>,
        /// 批次间等待秒数
        #[arg(long)]
        delay: Option<u64>,
    },
    /// 重试失败日志中的资产
    Retry {
        #[command(flatten)]
        projects: Projects,
    },
    /// 输出日志统计
    Stats,
    /// 写出默认配置文件
    InitConfig,
}

#[derive(Args)]
struct Projects {
    #[arg(long)]
    source: String,
    #[arg(long)]
    target: String,
}

/// 初始化日志系统
fn init_logging(config_file: &Path) {
    let config = LogConfig::load(config_file);

    if !config.enabled {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return;
    }

    let mut env_filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(config.tracing_level().into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    match SizeRotatingWriter::new(&config.log_dir(), config.max_size_mb) {
        Ok(file_writer) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false);
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                );
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        Err(e) => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                );
            let _ = tracing::subscriber::set_global_default(subscriber);
            tracing::warn!("无法创建日志文件，仅输出到控制台: {}", e);
        }
    }
}

fn print_statistics(stats: &LogStatistics) {
    println!("Successful: {}", stats.successful);
    println!("Failed: {}", stats.failed);
    if let Some(avg) = stats.average_size_kb {
        println!("Average size: {:.2} KB", avg);
    }
    if !stats.failed_assets.is_empty() {
        println!("Failed assets:");
        for name in &stats.failed_assets {
            println!("  {}", name);
        }
    }
}

fn print_event(event: &TransferEvent) {
    match event {
        TransferEvent::BatchStarted {
            batch,
            batches,
            size,
        } => println!("Batch {}/{} ({} assets)", batch, batches, size),
        TransferEvent::Progress { current, total } => println!("  {}/{}", current, total),
        TransferEvent::BatchVerified {
            batch,
            verification,
        } => {
            if verification.all_succeeded {
                println!("Batch {} verified", batch);
            } else {
                println!("Batch {} verification issues:", batch);
                for r in verification.results.iter().filter(|r| !r.success) {
                    println!("  {}: {}", r.asset_name, r.message);
                }
            }
        }
        TransferEvent::Pausing { delay } => println!("Waiting {}s...", delay.as_secs()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.config);

    let app = AppConfig::load(&cli.config);
    let logs = LogStore::new(
        &app.paths.success_log,
        &app.paths.error_log,
        &app.paths.temp_dir,
    );

    match cli.command {
        Command::InitConfig => {
            app.save(&cli.config)
                .with_context(|| format!("failed to write {:?}", cli.config))?;
            println!("Wrote {:?}", cli.config);
        }
        Command::Stats => print_statistics(&logs.statistics()?),
        Command::Copy {
            projects,
            assets,
            batch_size,
            retry_limit,
            delay,
        } => {
            let transfer = TransferConfig::new(
                batch_size.unwrap_or(app.transfer.batch_size),
                retry_limit.unwrap_or(app.transfer.retry_limit),
                delay.unwrap_or(app.transfer.inter_batch_delay_secs),
            )?;
            let selection = if assets.is_empty() {
                Selection::All
            } else {
                Selection::Named(assets)
            };

            let service = create_service(&app.service).await?;
            logs.init()?;
            let mut engine = TransferEngine::new(service.clone(), logs.clone(), transfer)?;
            let mut events = engine.subscribe();
            let printer = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    print_event(&event);
                }
            });

            let result = engine
                .transfer_all(&projects.source, &projects.target, &selection)
                .await;
            drop(engine);
            let _ = printer.await;
            if let Err(e) = service.sign_out().await {
                tracing::warn!("退出登录失败: {}", e);
            }

            let summary = result?;
            println!(
                "Copied {}/{} assets in {} batches ({} verification failures)",
                summary.succeeded, summary.total, summary.batches, summary.verification_failures
            );
            print_statistics(&logs.statistics()?);
        }
        Command::Retry { projects } => {
            let service = create_service(&app.service).await?;
            let engine = TransferEngine::new(service.clone(), logs.clone(), app.transfer)?;

            let result = RetryPass::new(&engine)
                .run(&projects.source, &projects.target)
                .await;
            if let Err(e) = service.sign_out().await {
                tracing::warn!("退出登录失败: {}", e);
            }

            let report = result?;
            println!(
                "Retried {} assets: {} succeeded, {} failed",
                report.attempted, report.succeeded, report.failed
            );
            print_statistics(&logs.statistics()?);
        }
    }

    Ok(())
}
