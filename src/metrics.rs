use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("georag_search_count", "count of the search queries", &["embedder"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "georag_search_duration",
        "duration of the per-query search in seconds",
        &["embedder"]
    )
    .unwrap()
});

static METRIC_SEARCH_TOP_SIMILARITY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "georag_search_top_similarity",
        "similarity percent of the best hit per query",
        &["embedder"],
        (5..=100).step_by(5).map(|x| x as f64).collect()
    )
    .unwrap()
});

static METRIC_DOWNLOAD_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("georag_download_count", "count of the served downloads").unwrap()
});

static METRIC_SUMMARIZE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("georag_summarize_failures", "count of the failed summarize calls")
        .unwrap()
});

/// 记录一次搜索
pub fn inc_search(embedder: &str, duration: f32, top_similarity: Option<f64>) {
    METRIC_SEARCH_COUNT.with_label_values(&[embedder]).inc();
    METRIC_SEARCH_DURATION.with_label_values(&[embedder]).observe(duration as f64);
    if let Some(similarity) = top_similarity {
        METRIC_SEARCH_TOP_SIMILARITY.with_label_values(&[embedder]).observe(similarity);
    }
}

pub fn inc_download() {
    METRIC_DOWNLOAD_COUNT.inc();
}

pub fn inc_summarize_failure() {
    METRIC_SUMMARIZE_FAILURES.inc();
}

/// 以文本格式导出所有指标
pub fn encode_text() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&prometheus::gather())?)
}
