//! 文本向量化
//!
//! 构建索引和搜索时必须使用同一个模型，否则距离没有意义。

#[cfg(feature = "fastembed")]
mod minilm;
mod hash;

use std::sync::Arc;

use log::info;
use thiserror::Error;

#[cfg(feature = "fastembed")]
pub use self::minilm::FastEmbedder;
pub use self::hash::HashEmbedder;
use crate::config::{EmbedOptions, EmbedderKind};

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// 模型无法加载或未编译进来
    #[error("模型不可用: {0}")]
    Unavailable(String),
    /// 输入文本超过模型限制，此处不做截断
    #[error("第 {index} 条文本长度 {len} 超过限制 {limit}")]
    InputTooLong { index: usize, len: usize, limit: usize },
    #[error("向量化失败: {0}")]
    Backend(String),
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// 文本向量化模型
pub trait Embedder: Send + Sync {
    /// 批量计算向量，输出和输入一一对应，且顺序相同
    fn embed(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// 向量维数
    fn dimension(&self) -> usize;

    /// 模型标识，会被写入索引清单
    fn id(&self) -> &str;
}

/// 根据命令行参数加载模型
pub fn load_embedder(opts: &EmbedOptions) -> EmbeddingResult<Arc<dyn Embedder>> {
    info!("加载向量化模型: {:?}", opts.embedder);
    match opts.embedder {
        EmbedderKind::Hash => Ok(Arc::new(HashEmbedder::new(opts.dimension)?)),
        #[cfg(feature = "fastembed")]
        EmbedderKind::Minilm => Ok(Arc::new(FastEmbedder::new(opts.model_cache.clone())?)),
        #[cfg(not(feature = "fastembed"))]
        EmbedderKind::Minilm => {
            Err(EmbeddingError::Unavailable("编译时未启用 fastembed 特性".to_string()))
        }
    }
}

/// 检查每条文本的字符数是否超过限制
pub(crate) fn check_input_len(texts: &[&str], limit: usize) -> EmbeddingResult<()> {
    for (index, text) in texts.iter().enumerate() {
        let len = text.chars().count();
        if len > limit {
            return Err(EmbeddingError::InputTooLong { index, len, limit });
        }
    }
    Ok(())
}

/// 原地做 L2 归一化，零向量保持不变
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0. {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}
