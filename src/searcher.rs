use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use thiserror::Error;

use crate::builder::{self, BuildError};
use crate::config::ConfDir;
use crate::embedding::{Embedder, EmbeddingError, normalize};
use crate::index::{FlatIndex, IndexError, Neighbor};
use crate::metrics;
use crate::model::{DatasetRecord, ScoredRecord};

/// 默认返回的结果数量
pub const DEFAULT_K: usize = 5;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("查询向量化失败: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("索引搜索失败: {0}")]
    Index(#[from] IndexError),
}

/// 检索服务
///
/// 构造后只读，可以在多个线程间直接共享。
pub struct Searcher {
    embedder: Arc<dyn Embedder>,
    index: FlatIndex,
    mapping: Vec<DatasetRecord>,
}

impl Searcher {
    pub fn new(embedder: Arc<dyn Embedder>, index: FlatIndex, mapping: Vec<DatasetRecord>) -> Self {
        if index.len() != mapping.len() {
            warn!("索引有 {} 行，映射有 {} 条，多出的部分不会被返回", index.len(), mapping.len());
        }
        Self { embedder, index, mapping }
    }

    /// 加载数据目录下的当前索引版本
    pub fn open(conf_dir: &ConfDir, embedder: Arc<dyn Embedder>) -> Result<Self, BuildError> {
        let loaded = builder::load(conf_dir)?;
        if loaded.manifest.embedder != embedder.id() {
            warn!(
                "索引使用模型 {} 构建，当前模型为 {}，搜索结果可能没有意义",
                loaded.manifest.embedder,
                embedder.id()
            );
        }
        debug!("已加载 {}，共 {} 条记录", loaded.generation.display(), loaded.mapping.len());
        Ok(Self::new(embedder, loaded.index, loaded.mapping))
    }

    /// 搜索与查询最相关的 k 条记录
    ///
    /// 结果按距离升序排列。空白查询直接返回空结果。
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredRecord>, SearchError> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let mut q = self
            .embedder
            .embed(&[query])?
            .pop()
            .ok_or_else(|| EmbeddingError::Backend("模型没有返回向量".to_string()))?;
        normalize(&mut q);

        let neighbors = self.index.search(&q, k)?;
        let hits = collect_hits(&neighbors, &self.mapping);

        let elapsed = start.elapsed().as_secs_f32();
        debug!("查询 {query:?} 返回 {} 条结果，耗时 {elapsed:.4}s", hits.len());
        metrics::inc_search(
            self.embedder.id(),
            elapsed,
            hits.first().map(|hit| hit.similarity_percent),
        );

        Ok(hits)
    }

    /// 全部记录，按索引行号排列
    pub fn records(&self) -> &[DatasetRecord] {
        &self.mapping
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }
}

/// 将 L2 距离平方转换为相似度百分比
///
/// 对于单位向量有 `d = 2(1 - cos)`，负的余弦相似度记为 0，结果保留一位小数，恰好一半时取偶数。
pub fn similarity_percent(distance: f32) -> f64 {
    let cosine = 1. - distance as f64 / 2.;
    let percent = cosine.clamp(0., 1.) * 100.;
    (percent * 10.).round_ties_even() / 10.
}

/// 将搜索结果映射回记录，跳过无效的行号
fn collect_hits(neighbors: &[Neighbor], mapping: &[DatasetRecord]) -> Vec<ScoredRecord> {
    neighbors
        .iter()
        .filter_map(|neighbor| {
            let record = usize::try_from(neighbor.id).ok().and_then(|i| mapping.get(i))?;
            Some(ScoredRecord {
                record: record.clone(),
                distance: neighbor.distance,
                similarity_percent: similarity_percent(neighbor.distance),
            })
        })
        .collect()
}
