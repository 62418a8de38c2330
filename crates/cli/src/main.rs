use clap::{Parser, Subcommand};

mod commands;

use commands::{
    ConsumeArgs, HistoryArgs, InitDbArgs, LatestArgs, ReplayCsvArgs, StatsArgs, SymbolsArgs,
};

#[derive(Parser)]
#[command(name = "tick-features")]
#[command(about = "Real-time per-symbol tick feature store", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = tick_features_core::config_loader::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the feature table and its unique index
    InitDb(InitDbArgs),
    /// Consume newline-delimited JSON ticks from stdin or a file
    Consume(ConsumeArgs),
    /// Replay an OHLCV CSV file for one symbol through the pipeline
    ReplayCsv(ReplayCsvArgs),
    /// Print the latest cached feature vector for a symbol
    Latest(LatestArgs),
    /// Print historical feature rows for a symbol, newest first
    History(HistoryArgs),
    /// List symbols with persisted features
    Symbols(SymbolsArgs),
    /// Print hot/cold availability and row counts for a symbol
    Stats(StatsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(&cli.config)?;

    match cli.command {
        Commands::InitDb(args) => commands::run_init_db(&config, args).await?,
        Commands::Consume(args) => commands::run_consume(&config, args).await?,
        Commands::ReplayCsv(args) => commands::run_replay_csv(&config, args).await?,
        Commands::Latest(args) => commands::run_latest(&config, args).await?,
        Commands::History(args) => commands::run_history(&config, args).await?,
        Commands::Symbols(args) => commands::run_symbols(&config, args).await?,
        Commands::Stats(args) => commands::run_stats(&config, args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["tick-features", "symbols", "--config", "custom.toml"]).unwrap();
        assert_eq!(cli.config, "custom.toml");
        assert!(matches!(cli.command, Commands::Symbols(_)));
    }

    #[test]
    fn parses_replay_csv() {
        let cli = Cli::try_parse_from([
            "tick-features",
            "replay-csv",
            "bars.csv",
            "--symbol",
            "ACME",
            "--in-memory",
        ])
        .unwrap();

        match cli.command {
            Commands::ReplayCsv(args) => {
                assert_eq!(args.path, "bars.csv");
                assert_eq!(args.symbol, "ACME");
                assert!(args.in_memory);
            }
            _ => panic!("expected replay-csv"),
        }
        assert_eq!(cli.config, "config/Config.toml");
    }

    #[test]
    fn history_defaults_limit() {
        let cli = Cli::try_parse_from(["tick-features", "history", "ACME"]).unwrap();
        match cli.command {
            Commands::History(args) => {
                assert_eq!(args.limit, tick_features_engine::DEFAULT_HISTORY_LIMIT);
                assert!(args.start.is_none());
            }
            _ => panic!("expected history"),
        }
    }
}
