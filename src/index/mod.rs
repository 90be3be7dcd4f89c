//! 精确 L2 距离的平铺索引
//!
//! 文件格式（小端序）：
//!
//! ```text
//! magic      "GRVI"   4 字节
//! version    u16
//! dimension  u32
//! count      u32
//! vectors    count * dimension 个 f32，按行连续存储
//! ```

mod topk;

use std::cmp::Ordering;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;
use thiserror::Error;

pub use self::topk::TopKNeighbors;
use crate::utils::atomic_write;

pub const INDEX_MAGIC: [u8; 4] = *b"GRVI";
pub const INDEX_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4 + 4;

/// 向量数量超过该值时并行扫描
const PARALLEL_THRESHOLD: usize = 4096;
const PARALLEL_CHUNK_ROWS: usize = 1024;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("第 {row} 个向量维数为 {actual}，期望 {expected}")]
    DimensionMismatch { row: usize, expected: usize, actual: usize },
    #[error("查询向量维数为 {actual}，索引维数为 {expected}")]
    QueryDimension { expected: usize, actual: usize },
    #[error("索引文件格式错误: {0}")]
    Format(String),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// 搜索结果
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    /// 向量在索引中的行号，-1 表示该位置没有结果
    pub id: i64,
    /// 与查询向量的 L2 距离平方
    pub distance: f32,
}

impl Default for Neighbor {
    fn default() -> Self {
        Self { id: -1, distance: f32::MAX }
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

/// 平铺索引，每一行是一个向量，行号即向量 ID
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    data: Array2<f32>,
}

impl FlatIndex {
    /// 创建一个维数为 `d` 的空索引
    pub fn new(d: usize) -> Self {
        Self { data: Array2::zeros((0, d)) }
    }

    /// 使用一组向量构建索引，维数由第一个向量决定
    ///
    /// 空输入会得到一个维数为 0 的空索引，搜索时总是返回空结果
    pub fn build(vectors: &[Vec<f32>]) -> IndexResult<Self> {
        let d = vectors.first().map_or(0, Vec::len);
        let mut index = Self::new(d);
        index.add(vectors)?;
        Ok(index)
    }

    /// 追加向量，新向量的行号从当前向量数开始
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> IndexResult<()> {
        let d = self.dimension();
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != d {
                return Err(IndexError::DimensionMismatch {
                    row: self.len() + i,
                    expected: d,
                    actual: v.len(),
                });
            }
        }
        let flat = vectors.iter().flatten().copied().collect::<Vec<_>>();
        let rows = Array2::from_shape_vec((vectors.len(), d), flat)?;
        self.data.append(Axis(0), rows.view())?;
        Ok(())
    }

    /// 索引中的向量数量
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 向量维数
    pub fn dimension(&self) -> usize {
        self.data.ncols()
    }

    /// 搜索 L2 距离最近的 k 个向量
    ///
    /// 结果按距离升序排列，距离相同时行号小的在前。向量数量不足 k 时返回全部向量。
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
        if k == 0 || self.is_empty() {
            return Ok(vec![]);
        }
        if query.len() != self.dimension() {
            return Err(IndexError::QueryDimension {
                expected: self.dimension(),
                actual: query.len(),
            });
        }

        let k = k.min(self.len());
        let q = ArrayView1::from(query);
        let top = if self.len() >= PARALLEL_THRESHOLD {
            self.data
                .axis_chunks_iter(Axis(0), PARALLEL_CHUNK_ROWS)
                .into_par_iter()
                .enumerate()
                .map(|(c, chunk)| {
                    let mut top = TopKNeighbors::new(k);
                    for (i, row) in chunk.outer_iter().enumerate() {
                        let id = (c * PARALLEL_CHUNK_ROWS + i) as i64;
                        top.push(Neighbor { id, distance: l2_sqr(row, q) });
                    }
                    top
                })
                .reduce(|| TopKNeighbors::new(k), TopKNeighbors::merge)
        } else {
            let mut top = TopKNeighbors::new(k);
            for (i, row) in self.data.outer_iter().enumerate() {
                top.push(Neighbor { id: i as i64, distance: l2_sqr(row, q) });
            }
            top
        };

        Ok(top.into_sorted_vec())
    }

    /// 保存到文件，先写入临时文件再重命名
    pub fn save(&self, path: impl AsRef<Path>) -> IndexResult<()> {
        let path = path.as_ref();
        debug!("保存索引到 {}，共 {} 个向量", path.display(), self.len());
        atomic_write(path, |w| self.write_to(w))?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&INDEX_MAGIC)?;
        writer.write_u16::<LittleEndian>(INDEX_VERSION)?;
        writer.write_u32::<LittleEndian>(to_u32(self.dimension())?)?;
        writer.write_u32::<LittleEndian>(to_u32(self.len())?)?;
        for x in self.data.iter() {
            writer.write_f32::<LittleEndian>(*x)?;
        }
        Ok(())
    }

    /// 从文件加载索引
    pub fn load(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        debug!("从 {} 加载索引", path.display());
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> IndexResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(IndexError::Format(format!("文件过短: {} 字节", bytes.len())));
        }
        let mut cursor = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC {
            return Err(IndexError::Format(format!("magic 不匹配: {magic:?}")));
        }
        let version = cursor.read_u16::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(IndexError::Format(format!("不支持的版本: {version}")));
        }
        let d = cursor.read_u32::<LittleEndian>()? as usize;
        let n = cursor.read_u32::<LittleEndian>()? as usize;

        let expected = n
            .checked_mul(d)
            .and_then(|x| x.checked_mul(4))
            .and_then(|x| x.checked_add(HEADER_LEN))
            .ok_or_else(|| IndexError::Format("文件大小溢出".to_string()))?;
        if bytes.len() != expected {
            return Err(IndexError::Format(format!(
                "文件大小不匹配: 期望 {expected} 字节，实际 {} 字节",
                bytes.len()
            )));
        }

        let mut flat = vec![0f32; n * d];
        cursor.read_f32_into::<LittleEndian>(&mut flat)?;
        let data = Array2::from_shape_vec((n, d), flat)?;
        Ok(Self { data })
    }
}

#[inline]
fn l2_sqr(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn to_u32(n: usize) -> io::Result<u32> {
    u32::try_from(n).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "索引过大"))
}
