use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "evm-account-scanner")]
#[command(about = "Scans an account's EVM history for transactions, NFT transfers and collections")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Full activity report for one account
    Scan {
        address: String,
        #[arg(long, default_value_t = 0)]
        from_block: u64,
        #[arg(long)]
        pretty: bool,
    },
    /// Derived holders of one ERC-721 contract
    Holders {
        contract: String,
        #[arg(short, long)]
        threshold: Option<usize>,
        #[arg(long, default_value_t = 0)]
        from_block: u64,
        #[arg(long)]
        pretty: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan() {
        let cli = Cli::parse_from(["evm-account-scanner", "scan", "0xabc", "--from-block", "12", "--pretty"]);
        match cli.command {
            Commands::Scan { address, from_block, pretty } => {
                assert_eq!(address, "0xabc");
                assert_eq!(from_block, 12);
                assert!(pretty);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_parse_holders_threshold() {
        let cli = Cli::parse_from(["evm-account-scanner", "holders", "0xdef", "-t", "3"]);
        match cli.command {
            Commands::Holders { threshold, from_block, .. } => {
                assert_eq!(threshold, Some(3));
                assert_eq!(from_block, 0);
            }
            _ => panic!("expected holders"),
        }
    }
}
