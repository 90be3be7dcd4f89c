use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::{EmbedOptions, Opts, SearchOptions};
use crate::embedding::load_embedder;
use crate::model::ScoredRecord;
use crate::searcher::Searcher;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 查询文本
    pub query: String,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let result = block_in_place(|| -> Result<_> {
            let embedder = load_embedder(&self.embed)?;
            let searcher = Searcher::open(&opts.conf_dir, embedder)
                .context("加载索引失败，请先运行 build")?;
            Ok(searcher.search(&self.query, self.search.k)?)
        })?;

        print_result(&result, self.output_format)
    }
}

fn print_result(result: &[ScoredRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                let record = &hit.record;
                println!(
                    "{:.1}%\t{:.4}\t{}\t{}",
                    hit.similarity_percent, hit.distance, record.file_id, record.location.label
                );
            }
        }
    }
    Ok(())
}
