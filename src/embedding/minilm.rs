use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use log::debug;

use super::{Embedder, EmbeddingError, EmbeddingResult, check_input_len, normalize};

/// MiniLM 的上下文窗口为 256 个词元，此处按字符数粗略限制
const MAX_INPUT_CHARS: usize = 4096;

/// 使用 fastembed 在本地运行的 all-MiniLM-L6-v2 模型
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
}

impl FastEmbedder {
    pub fn new(cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }
        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::Unavailable(format!("MiniLM 初始化失败: {e}")))?;
        Ok(Self { model: Mutex::new(model) })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        check_input_len(texts, MAX_INPUT_CHARS)?;

        let mut model =
            self.model.lock().map_err(|_| EmbeddingError::Backend("模型锁已中毒".to_string()))?;
        debug!("MiniLM 批量计算 {} 条文本", texts.len());
        let mut embeddings =
            model.embed(texts.to_vec(), None).map_err(|e| EmbeddingError::Backend(e.to_string()))?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::Backend(format!(
                "模型返回了 {} 个向量，期望 {} 个",
                embeddings.len(),
                texts.len()
            )));
        }
        embeddings.iter_mut().for_each(|v| normalize(v));
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        384
    }

    fn id(&self) -> &str {
        "all-MiniLM-L6-v2"
    }
}
