use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, SearchOptions};
use crate::counter::DownloadCounter;
use crate::embedding::load_embedder;
use crate::searcher::Searcher;
use crate::summarize::{DEFAULT_GEMINI_MODEL, GeminiSummarizer, RetryPolicy, Summarizer};
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub addr: String,
    /// 可供下载的原始数据目录，默认为数据目录下的 raw
    #[arg(long, value_name = "DIR")]
    pub raw_dir: Option<PathBuf>,
    /// Gemini API key，不填则摘要功能不可用
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,
    /// 生成摘要使用的 Gemini 模型
    #[arg(long, value_name = "MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let searcher = block_in_place(|| -> anyhow::Result<_> {
            let embedder = load_embedder(&self.embed)?;
            Searcher::open(&opts.conf_dir, embedder).context("加载索引失败，请先运行 build")
        })?;
        info!("已加载 {} 条记录", searcher.records().len());

        let summarizer = match self.gemini_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {
                let gemini = GeminiSummarizer::new(key.to_string(), self.gemini_model.clone())?;
                Some(Arc::new(gemini) as Arc<dyn Summarizer>)
            }
            _ => {
                warn!("未配置 Gemini API key，摘要功能不可用");
                None
            }
        };

        // 创建应用状态
        let state = server::AppState {
            searcher,
            counter: DownloadCounter::new(opts.conf_dir.download_stats()),
            raw_dir: self.raw_dir.clone().unwrap_or_else(|| opts.conf_dir.raw_dir()),
            summarizer,
            retry: RetryPolicy::default(),
            default_k: self.search.k,
        };

        // 创建应用
        let app = server::create_app(Arc::new(state));

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
