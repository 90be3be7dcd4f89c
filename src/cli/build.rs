use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::builder::{build_index, persist, read_records};
use crate::cli::SubCommandExtend;
use crate::config::EmbedOptions;
use crate::embedding::load_embedder;
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    /// 元数据记录文件，默认为数据目录下的 metadata_descriptions.json
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let input = self.input.clone().unwrap_or_else(|| opts.conf_dir.records());

        let generation = block_in_place(|| -> Result<PathBuf> {
            let records = read_records(&input)
                .with_context(|| format!("读取记录文件 {} 失败", input.display()))?;
            info!("读取到 {} 条记录", records.len());
            let embedder = load_embedder(&self.embed)?;
            let (index, mapping) = build_index(records, embedder.as_ref())?;
            Ok(persist(&opts.conf_dir, &index, &mapping, embedder.id())?)
        })?;

        info!("构建索引成功: {}", generation.display());
        Ok(())
    }
}
