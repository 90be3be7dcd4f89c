use std::path::PathBuf;
use std::sync::Arc;

use crate::counter::DownloadCounter;
use crate::searcher::Searcher;
use crate::summarize::{RetryPolicy, Summarizer};

/// 应用状态
pub struct AppState {
    /// 只读的检索服务
    pub searcher: Searcher,
    /// 下载计数
    pub counter: DownloadCounter,
    /// 可供下载的原始数据目录
    pub raw_dir: PathBuf,
    /// 摘要模型，未配置时为 None
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub retry: RetryPolicy,
    /// 请求未指定 k 时返回的结果数量
    pub default_k: usize,
}
