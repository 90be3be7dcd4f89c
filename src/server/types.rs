use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// 搜索参数
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// 查询文本，为空时返回空数组
    #[serde(default)]
    pub q: String,
    /// 返回的结果数量
    pub k: Option<usize>,
}

/// 生成摘要的请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct SummarizeRequest {
    /// 数据文件的描述
    #[serde(default)]
    pub description: String,
    /// 文件名
    #[serde(default = "unknown_file")]
    #[schema(default = "Unknown File")]
    pub file: String,
}

fn unknown_file() -> String {
    "Unknown File".to_string()
}

/// 生成摘要的响应，失败时也使用该格式
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SummarizeResponse {
    pub summary: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// 每个文件的下载次数
#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct DownloadStats(pub BTreeMap<String, u64>);
