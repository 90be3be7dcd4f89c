use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// 数据文件记录，由外部的元数据提取步骤生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DatasetRecord {
    /// 原始文件名
    #[serde(rename = "file")]
    pub file_id: String,
    /// 提取元数据时的文件路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// 格式、维度和内容的文字描述
    pub description: String,
    /// 地理位置
    #[serde(default)]
    pub location: Location,
    /// 格式相关的原始元数据，此处不做解析
    #[serde(rename = "metadata", default)]
    #[schema(value_type = Object)]
    pub raw_metadata: Value,
}

/// 数据文件的地理位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub label: String,
}

impl Default for Location {
    fn default() -> Self {
        Self { lat: 0., lon: 0., label: "Unknown location".to_string() }
    }
}

/// 带距离和相似度的搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: DatasetRecord,
    /// 原始的 L2 距离平方
    pub distance: f32,
    /// 相似度百分比，范围 0 ~ 100，保留一位小数
    pub similarity_percent: f64,
}
