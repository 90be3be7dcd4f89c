//! 索引构建与持久化
//!
//! 每次构建写入一个新的版本目录 `index/gen-N/`，全部落盘后再原子地更新 `index/CURRENT`，
//! 所以读取方看到的索引和映射总是同一次构建的产物。

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfDir;
use crate::embedding::{Embedder, EmbeddingError, normalize};
use crate::index::{FlatIndex, IndexError};
use crate::model::DatasetRecord;
use crate::utils::{atomic_write, sync_dir};

pub const MANIFEST_VERSION: u32 = 1;

const INDEX_FILE: &str = "index.bin";
const MAPPING_FILE: &str = "mapping.json";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("IO 错误: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
    /// 索引、映射和清单三者不一致
    #[error("索引数据不一致: {0}")]
    Mismatch(String),
}

pub type BuildResult<T> = Result<T, BuildError>;

/// 构建清单，和索引一起保存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// 构建时使用的模型标识
    pub embedder: String,
    pub dimension: usize,
    pub count: usize,
    pub index_blake3: String,
    pub mapping_blake3: String,
}

/// 从磁盘加载的一个完整索引版本
#[derive(Debug)]
pub struct LoadedIndex {
    pub generation: PathBuf,
    pub manifest: Manifest,
    pub index: FlatIndex,
    pub mapping: Vec<DatasetRecord>,
}

/// 读取元数据提取步骤输出的 JSON 数组
pub fn read_records(path: impl AsRef<Path>) -> BuildResult<Vec<DatasetRecord>> {
    let path = path.as_ref();
    debug!("读取记录: {}", path.display());
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// 对所有描述做一次批量向量化并构建索引
///
/// 返回的映射与索引按行号一一对应。
pub fn build_index(
    records: Vec<DatasetRecord>,
    embedder: &dyn Embedder,
) -> BuildResult<(FlatIndex, Vec<DatasetRecord>)> {
    if records.is_empty() {
        warn!("没有任何记录，将构建空索引");
        return Ok((FlatIndex::new(embedder.dimension()), records));
    }

    info!("正在向量化 {} 条描述", records.len());
    let descriptions = records.iter().map(|r| r.description.as_str()).collect::<Vec<_>>();
    let mut vectors = embedder.embed(&descriptions)?;
    if vectors.len() != records.len() {
        return Err(BuildError::Mismatch(format!(
            "模型返回 {} 个向量，期望 {} 个",
            vectors.len(),
            records.len()
        )));
    }
    vectors.par_iter_mut().for_each(|v| normalize(v));

    let index = FlatIndex::build(&vectors)?;
    info!("索引构建完成，共 {} 个向量，维数 {}", index.len(), index.dimension());
    Ok((index, records))
}

/// 将索引和映射写入一个新版本，并切换 CURRENT 指向它
///
/// 失败时删除写了一半的版本目录，CURRENT 仍然指向之前的版本。
pub fn persist(
    conf_dir: &ConfDir,
    index: &FlatIndex,
    mapping: &[DatasetRecord],
    embedder_id: &str,
) -> BuildResult<PathBuf> {
    if index.len() != mapping.len() {
        return Err(BuildError::Mismatch(format!(
            "索引有 {} 行，映射有 {} 条",
            index.len(),
            mapping.len()
        )));
    }

    fs::create_dir_all(conf_dir.index_dir())?;
    let n = conf_dir.next_generation();
    let dir = conf_dir.generation(n);
    fs::create_dir(&dir)?;

    let result = write_generation(&dir, index, mapping, embedder_id).and_then(|()| {
        let name = format!("gen-{n}");
        atomic_write(&conf_dir.current_pointer(), |w| w.write_all(name.as_bytes()))?;
        Ok(())
    });
    if let Err(e) = result {
        discard_generation(conf_dir, n);
        return Err(e);
    }

    info!("索引已保存到 {}", dir.display());
    prune_generations(conf_dir, n);
    Ok(dir)
}

fn write_generation(
    dir: &Path,
    index: &FlatIndex,
    mapping: &[DatasetRecord],
    embedder_id: &str,
) -> BuildResult<()> {
    let index_path = dir.join(INDEX_FILE);
    index.save(&index_path)?;
    let index_blake3 = blake3::hash(&fs::read(&index_path)?).to_hex().to_string();

    let mapping_bytes = serde_json::to_vec_pretty(mapping)?;
    atomic_write(&dir.join(MAPPING_FILE), |w| w.write_all(&mapping_bytes))?;
    let mapping_blake3 = blake3::hash(&mapping_bytes).to_hex().to_string();

    let manifest = Manifest {
        version: MANIFEST_VERSION,
        embedder: embedder_id.to_string(),
        dimension: index.dimension(),
        count: index.len(),
        index_blake3,
        mapping_blake3,
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
    atomic_write(&dir.join(MANIFEST_FILE), |w| w.write_all(&manifest_bytes))?;

    sync_dir(dir)?;
    Ok(())
}

/// 删除写入失败的版本目录，CURRENT 已经指向它时保留
fn discard_generation(conf_dir: &ConfDir, n: u64) {
    let dir = conf_dir.generation(n);
    let live = fs::read_to_string(conf_dir.current_pointer())
        .is_ok_and(|pointer| pointer.trim() == format!("gen-{n}"));
    if live {
        warn!("CURRENT 已指向 {}，不再清理", dir.display());
        return;
    }
    warn!("写入索引版本 {} 失败，正在清理", dir.display());
    if let Err(e) = fs::remove_dir_all(&dir) {
        warn!("清理 {} 失败: {e}", dir.display());
    }
}

/// 删除比 `current` 更旧的版本
fn prune_generations(conf_dir: &ConfDir, current: u64) {
    for n in conf_dir.all_generations().into_iter().filter(|&n| n < current) {
        let dir = conf_dir.generation(n);
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!("删除旧索引版本 {}", dir.display()),
            Err(e) => warn!("删除旧索引版本 {} 失败: {e}", dir.display()),
        }
    }
}

/// 加载 CURRENT 指向的索引版本，并校验其完整性
pub fn load(conf_dir: &ConfDir) -> BuildResult<LoadedIndex> {
    let pointer = fs::read_to_string(conf_dir.current_pointer())?;
    let name = pointer.trim();
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(BuildError::Mismatch(format!("无效的 CURRENT 内容: {name:?}")));
    }
    let dir = conf_dir.index_dir().join(name);
    debug!("加载索引版本 {}", dir.display());

    let manifest: Manifest = serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?;
    if manifest.version != MANIFEST_VERSION {
        return Err(BuildError::Mismatch(format!("不支持的清单版本: {}", manifest.version)));
    }

    let index_bytes = fs::read(dir.join(INDEX_FILE))?;
    check_digest(INDEX_FILE, &index_bytes, &manifest.index_blake3)?;
    let mapping_bytes = fs::read(dir.join(MAPPING_FILE))?;
    check_digest(MAPPING_FILE, &mapping_bytes, &manifest.mapping_blake3)?;

    let index = FlatIndex::from_bytes(&index_bytes)?;
    let mapping: Vec<DatasetRecord> = serde_json::from_slice(&mapping_bytes)?;

    if manifest.count != index.len() || mapping.len() != index.len() {
        return Err(BuildError::Mismatch(format!(
            "清单记录 {} 条，索引 {} 行，映射 {} 条",
            manifest.count,
            index.len(),
            mapping.len()
        )));
    }
    if manifest.dimension != index.dimension() {
        return Err(BuildError::Mismatch(format!(
            "清单维数 {}，索引维数 {}",
            manifest.dimension,
            index.dimension()
        )));
    }

    Ok(LoadedIndex { generation: dir, manifest, index, mapping })
}

fn check_digest(name: &str, bytes: &[u8], expected: &str) -> BuildResult<()> {
    let actual = blake3::hash(bytes).to_hex();
    if actual.as_str() != expected {
        return Err(BuildError::Mismatch(format!("{name} 校验和不匹配")));
    }
    Ok(())
}
