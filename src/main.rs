use clap::Parser;
use georag::Opts;
use georag::cli::SubCommandExtend;
use georag::config::SubCommand;
use log::error;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() {
    // .env 中可以配置 GEMINI_API_KEY
    dotenvy::dotenv().ok();
    env_logger::init();

    let opts = Opts::parse();

    let result = match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Server(config) => config.run(&opts).await,
        SubCommand::Stats(config) => config.run(&opts).await,
    };

    if let Err(e) = result {
        error!("{e:?}");
        std::process::exit(1);
    }
}
