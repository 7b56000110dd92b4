//! imgtools 命令行程序

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use imgtools_core::ImgtoolsConfig;
use imgtools_crawler::{CrawlOptions, Crawler, SidecarPaths};
use imgtools_interlacer::{Interlacer, QueryOptions};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// imgtools 命令行参数
#[derive(Parser, Debug)]
#[command(name = "imgtools")]
#[command(about = "DICOM 数据集爬取、引用解析与序列森林查询")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 爬取目录并写出索引
    Crawl {
        dir: PathBuf,
        /// 并行工作线程数
        #[arg(short, long)]
        jobs: Option<usize>,
        /// 忽略已有索引，全部重新提取
        #[arg(short, long)]
        force: bool,
        /// 以 JSON 输出爬取统计
        #[arg(long)]
        json: bool,
    },
    /// 打印序列森林
    Tree { dir: PathBuf },
    /// 按模态链查询，例如 "CT,RTSTRUCT" 或 "*"
    Query {
        dir: PathBuf,
        chain: String,
        /// 同一根节点下的结果合并为一个样本
        #[arg(long)]
        group_by_root: bool,
        #[arg(long)]
        json: bool,
    },
    /// 导出关系图
    Graph {
        dir: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = GraphFormat::Html)]
        format: GraphFormat,
    },
    /// 打印当前生效的配置
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum GraphFormat {
    Html,
    Dot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let config = ImgtoolsConfig::load(args.config.as_deref())?;

    let result = match args.command {
        Command::Crawl { dir, jobs, force, json } => crawl(config, dir, jobs, force, json).await,
        Command::Tree { dir } => {
            let interlacer = load_interlacer(&config, &dir)?;
            print!("{}", interlacer.render_tree());
            println!("{}", interlacer.stats());
            Ok(())
        }
        Command::Query {
            dir,
            chain,
            group_by_root,
            json,
        } => {
            let interlacer = load_interlacer(&config, &dir)?;
            let options = QueryOptions {
                group_by_root: group_by_root || config.interlacer.group_by_root,
            };
            let samples = interlacer.query_with(&chain, options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&samples)?);
            } else {
                for sample in &samples {
                    println!("{}", sample);
                }
                info!("共 {} 个样本", samples.len());
            }
            Ok(())
        }
        Command::Graph { dir, output, format } => {
            let interlacer = load_interlacer(&config, &dir)?;
            match format {
                GraphFormat::Html => interlacer.write_html_graph(&output)?,
                GraphFormat::Dot => std::fs::write(&output, interlacer.render_dot())
                    .with_context(|| format!("无法写入 {}", output.display()))?,
            }
            info!("关系图已导出: {}", output.display());
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("执行失败: {:#}", e);
    }
    result
}

async fn crawl(config: ImgtoolsConfig, dir: PathBuf, jobs: Option<usize>, force: bool, json: bool) -> anyhow::Result<()> {
    let mut options = CrawlOptions::from_config(&config);
    if let Some(jobs) = jobs {
        options = options.with_jobs(jobs);
    }
    options.force |= force;

    let crawler = Crawler::new(options);
    let cancel = crawler.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，等待进行中的序列完成后停止");
            cancel.cancel();
        }
    });

    let output = tokio::task::spawn_blocking(move || crawler.crawl(&dir))
        .await
        .context("爬取任务异常退出")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&output.summary)?);
    } else {
        println!("{}", output.summary);
    }
    match &output.sidecar {
        Some(paths) => info!("索引目录: {}", paths.dir.display()),
        None if output.summary.is_cancelled() => warn!("爬取已取消，未写出索引"),
        None => {}
    }
    Ok(())
}

fn load_interlacer(config: &ImgtoolsConfig, dir: &Path) -> anyhow::Result<Interlacer> {
    let paths = SidecarPaths::for_root(dir, config.index.sidecar_dir.as_deref())?;
    Interlacer::from_index_csv_with(&paths.index_csv, &config.interlacer).with_context(|| {
        format!(
            "无法读取 {} 的索引，请先运行 imgtools crawl",
            dir.display()
        )
    })
}
