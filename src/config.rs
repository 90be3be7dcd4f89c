use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "georag", "georag")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".")
}

#[derive(Parser, Debug, Clone)]
pub struct EmbedOptions {
    /// 向量化模型，构建索引和搜索时必须一致
    #[arg(long, value_enum, default_value_t = EmbedderKind::Hash)]
    pub embedder: EmbedderKind,
    /// 哈希模型的向量维数
    #[arg(long, value_name = "N", default_value_t = 384)]
    pub dimension: usize,
    /// MiniLM 模型文件缓存目录
    #[arg(long, value_name = "DIR")]
    pub model_cache: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// FNV-1a 特征哈希，无需下载模型
    Hash,
    /// all-MiniLM-L6-v2，需要启用 fastembed 特性
    Minilm,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的结果数量
    #[arg(short, value_name = "K", default_value_t = 5)]
    pub k: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "georag", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，存放元数据、索引和下载统计
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从元数据描述构建索引
    Build(BuildCommand),
    /// 使用自然语言搜索数据文件
    Search(SearchCommand),
    /// 启动 HTTP 服务
    Server(ServerCommand),
    /// 显示下载统计
    Stats(StatsCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 元数据提取步骤输出的记录文件
    pub fn records(&self) -> PathBuf {
        self.path.join("metadata_descriptions.json")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.path.join("index")
    }

    /// 指向当前索引版本的文件
    pub fn current_pointer(&self) -> PathBuf {
        self.index_dir().join("CURRENT")
    }

    /// 返回第 n 个索引版本的目录
    pub fn generation(&self, n: u64) -> PathBuf {
        self.index_dir().join(format!("gen-{n}"))
    }

    /// 返回已存在的所有索引版本号，升序
    pub fn all_generations(&self) -> Vec<u64> {
        let mut generations = std::fs::read_dir(self.index_dir())
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                entry.file_name().to_str()?.strip_prefix("gen-")?.parse::<u64>().ok()
            })
            .collect::<Vec<_>>();
        generations.sort_unstable();
        generations
    }

    /// 返回下一个索引版本号
    pub fn next_generation(&self) -> u64 {
        self.all_generations().last().map_or(1, |n| n + 1)
    }

    /// 下载计数文件
    pub fn download_stats(&self) -> PathBuf {
        self.path.join("download_stats.json")
    }

    /// 可供下载的原始数据目录
    pub fn raw_dir(&self) -> PathBuf {
        self.path.join("raw")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
