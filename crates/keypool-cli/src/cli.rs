use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "keypool",
    about = "keypool: leased signing-key slots over a shared store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file; `KEYPOOL_*` variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the effective configuration
    Config(ConfigArgs),
    /// Run concurrent signers against an in-memory store and check exclusivity
    Simulate(SimulateArgs),
}

#[derive(Args)]
pub struct ConfigArgs {}

#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Number of concurrent signers
    #[arg(short, long, default_value = "16")]
    pub workers: usize,
    /// Key slots available on the account (defaults to `max_capacity`)
    #[arg(short, long)]
    pub slots: Option<u32>,
    /// Submissions per signer
    #[arg(short, long, default_value = "5")]
    pub rounds: usize,
    /// How long each submission holds its slot, in milliseconds
    #[arg(long, default_value = "20")]
    pub hold_ms: u64,
    /// Account address whose key slots are leased
    #[arg(long, default_value = "0xf8d6e0586b0a20c7")]
    pub address: String,
    /// Number of recent transaction ids to print
    #[arg(long, default_value = "5")]
    pub recent: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config() {
        let cli = Cli::try_parse_from(["keypool", "config"]).unwrap();
        assert!(matches!(cli.command, Command::Config(_)));
        assert!(cli.config.is_none());
    }

    #[test]
    fn parse_config_file() {
        let cli = Cli::try_parse_from(["keypool", "--config", "keypool.toml", "config"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("keypool.toml")));
    }

    #[test]
    fn parse_simulate_defaults() {
        let cli = Cli::try_parse_from(["keypool", "simulate"]).unwrap();
        if let Command::Simulate(args) = cli.command {
            assert_eq!(args.workers, 16);
            assert_eq!(args.slots, None);
            assert_eq!(args.rounds, 5);
            assert_eq!(args.hold_ms, 20);
            assert_eq!(args.recent, 5);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_simulate_overrides() {
        let cli = Cli::try_parse_from([
            "keypool", "simulate", "-w", "4", "-s", "2", "--address", "0x01",
        ])
        .unwrap();
        if let Command::Simulate(args) = cli.command {
            assert_eq!(args.workers, 4);
            assert_eq!(args.slots, Some(2));
            assert_eq!(args.address, "0x01");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["keypool", "--verbose", "config"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["keypool", "--format", "json", "config"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
