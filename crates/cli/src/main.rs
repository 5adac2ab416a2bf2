use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hesab")]
#[command(about = "Hesab CLI: Telegram spreadsheet assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: HESAB_CONFIG_PATH or ~/.hesab/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the webhook gateway (Telegram POSTs to `/`).
    Serve {
        /// Config file path (default: HESAB_CONFIG_PATH or ~/.hesab/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Send one prompt through the provider chain and print the reply.
    Ask {
        /// Config file path (default: HESAB_CONFIG_PATH or ~/.hesab/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        prompt: String,
    },

    /// Summarize a local spreadsheet (.xlsx or .xls), or look up customers for an item.
    Analyze {
        file: PathBuf,

        /// Item name; prints the customers who bought it instead of the summary.
        #[arg(long, value_name = "ITEM")]
        lookup: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("hesab {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { config, prompt }) => {
            if let Err(e) = run_ask(config, &prompt).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Analyze { file, lookup }) => {
            if let Err(e) = run_analyze(&file, lookup.as_deref()) {
                log::error!("analyze failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(hesab::config::default_config_path);
    let dir = hesab::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = hesab::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    hesab::gateway::run_gateway(config).await
}

async fn run_ask(config_path: Option<PathBuf>, prompt: &str) -> anyhow::Result<()> {
    let (config, _) = hesab::config::load_config(config_path)?;
    let chain = hesab::llm::ProviderChain::from_config(&config);
    match chain.ask(prompt, config.assistant.system_prompt.as_deref()).await {
        Ok(reply) => {
            println!("{}", reply.text);
            log::info!("answered by {}", reply.provider);
            Ok(())
        }
        Err(exhausted) => anyhow::bail!(
            "no provider answered ({} from {}): {}",
            exhausted.last.kind(),
            exhausted.provider,
            exhausted.last
        ),
    }
}

fn run_analyze(file: &std::path::Path, lookup: Option<&str>) -> anyhow::Result<()> {
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dataset = hesab::dataset::ingest(&data, &name)?;
    match lookup {
        Some(term) => {
            let result = hesab::dataset::lookup_related_customers(
                term,
                &dataset,
                hesab::dataset::DEFAULT_LOOKUP_TOP_N,
            );
            println!("{}", result);
        }
        None => println!("{}", hesab::dataset::summarize(&dataset)),
    }
    Ok(())
}
