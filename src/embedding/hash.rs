use super::{Embedder, EmbeddingError, EmbeddingResult, check_input_len, normalize};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a 特征哈希模型
///
/// 将小写的字母数字词元哈希到 `dimension` 个桶中，最高位决定符号，最后做 L2 归一化。
/// 不需要下载模型文件，结果完全确定，但只能匹配字面上相同的词。
pub struct HashEmbedder {
    dimension: usize,
    max_input_chars: usize,
    id: String,
}

impl HashEmbedder {
    pub const DEFAULT_MAX_INPUT_CHARS: usize = 65536;

    pub fn new(dimension: usize) -> EmbeddingResult<Self> {
        Self::with_limit(dimension, Self::DEFAULT_MAX_INPUT_CHARS)
    }

    pub fn with_limit(dimension: usize, max_input_chars: usize) -> EmbeddingResult<Self> {
        if dimension == 0 {
            return Err(EmbeddingError::Unavailable("向量维数不能为 0".to_string()));
        }
        Ok(Self { dimension, max_input_chars, id: format!("hash-fnv1a-{dimension}") })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let sign = if h >> 63 == 1 { -1. } else { 1. };
            v[(h % self.dimension as u64) as usize] += sign;
        }
        normalize(&mut v);
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: 384,
            max_input_chars: Self::DEFAULT_MAX_INPUT_CHARS,
            id: "hash-fnv1a-384".to_string(),
        }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        check_input_len(texts, self.max_input_chars)?;
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric()).filter(|s| !s.is_empty()).map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}
