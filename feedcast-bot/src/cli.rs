use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Relays new posts of a syndication feed to Telegram chats
#[derive(Debug, Parser)]
#[command(name = "feedcast", version)]
#[command(about = "Relays new posts of a syndication feed to Telegram chats", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll the feed and deliver new posts (default)
    Run,
    /// Forget stored state
    Reset {
        #[arg(value_enum)]
        target: ResetTarget,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage the chats receiving posts
    Chats {
        #[command(subcommand)]
        action: ChatsAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResetTarget {
    /// Last published dates
    Data,
    /// Registered chats
    Chats,
    All,
}

#[derive(Debug, Subcommand)]
pub enum ChatsAction {
    List,
    Add {
        #[arg(allow_negative_numbers = true)]
        id: i64,
        #[arg(long)]
        title: Option<String>,
    },
    Remove {
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Run)
    }
}

impl ResetTarget {
    pub fn data(self) -> bool {
        matches!(self, ResetTarget::Data | ResetTarget::All)
    }

    pub fn chats(self) -> bool {
        matches!(self, ResetTarget::Chats | ResetTarget::All)
    }
}
