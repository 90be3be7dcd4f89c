use anyhow::Result;
use clap::Parser;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::counter::DownloadCounter;
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let stats = DownloadCounter::new(opts.conf_dir.download_stats()).read_all()?;
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            OutputFormat::Table => {
                let mut stats = stats.into_iter().collect::<Vec<_>>();
                stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                for (file, count) in stats {
                    println!("{count}\t{file}");
                }
            }
        }
        Ok(())
    }
}
