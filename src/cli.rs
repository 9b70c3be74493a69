use clap::{Parser, Subcommand};

/// Authenticated VM power-control gateway for Proxmox VE
#[derive(Parser)]
#[command(name = "vmgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (defaults to VMGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Mint or inspect bearer tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// List VMs on a hypervisor node using the service API token
    Inventory {
        /// Node to list (defaults to the first node the cluster reports)
        #[arg(long)]
        node: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token without a password check (operator use)
    Issue {
        #[arg(long)]
        username: String,
        /// Lifetime in minutes; 15 when omitted
        #[arg(long)]
        ttl_minutes: Option<u64>,
    },
    /// Validate a token and print its subject
    Inspect { token: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["vmgate"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_token_issue_args() {
        let cli = Cli::try_parse_from(["vmgate", "token", "issue", "--username", "alice@pve", "--ttl-minutes", "5"])
            .unwrap();
        match cli.command {
            Some(Commands::Token {
                command: TokenCommands::Issue { username, ttl_minutes },
            }) => {
                assert_eq!(username, "alice@pve");
                assert_eq!(ttl_minutes, Some(5));
            }
            _ => panic!("expected token issue"),
        }
    }

    #[test]
    fn test_inventory_node_flag() {
        let cli = Cli::try_parse_from(["vmgate", "inventory", "--node", "pve2"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Inventory { node: Some(ref n) }) if n == "pve2"));
    }
}
