//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Schedule encrypted messages for future email delivery.
#[derive(Debug, Parser)]
#[command(name = "timecapsule", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, env = "TIMECAPSULE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Draft fields shared by `create` and `update`.
#[derive(Debug, clap::Args)]
pub struct DraftArgs {
    /// Sender email address.
    #[arg(long)]
    pub from: String,

    /// Recipient email address.
    #[arg(long)]
    pub to: String,

    /// Subject line (empty means a default is used at delivery time).
    #[arg(long, default_value = "")]
    pub subject: String,

    /// Message body text.
    #[arg(long, conflicts_with = "body_file")]
    pub body: Option<String>,

    /// Read the message body from a file.
    #[arg(long)]
    pub body_file: Option<PathBuf>,

    /// Delivery time, RFC 3339 (e.g. 2027-01-01T09:00:00Z).
    #[arg(long)]
    pub send_at: String,

    /// Path to an image delivered inline with the message.
    #[arg(long)]
    pub image: Option<PathBuf>,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate keys and write a fresh configuration file.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },

    /// Schedule a new message.
    Create {
        #[command(flatten)]
        draft: DraftArgs,
    },

    /// Show the decrypted management view of a message.
    Show {
        /// Public handle (TC-XXXX-XXXX).
        handle: String,
    },

    /// Replace content and schedule of a pending message.
    Update {
        /// Public handle (TC-XXXX-XXXX).
        handle: String,

        #[command(flatten)]
        draft: DraftArgs,
    },

    /// Cancel a pending message.
    Cancel {
        /// Public handle (TC-XXXX-XXXX).
        handle: String,
    },

    /// Move the delivery time of a pending message.
    Reschedule {
        /// Public handle (TC-XXXX-XXXX).
        handle: String,

        /// New delivery time, RFC 3339.
        #[arg(long)]
        send_at: String,
    },

    /// Preview subject and body via a preview token.
    Preview {
        /// Opaque preview token returned at creation.
        token: String,
    },

    /// Cancel a pending message via its cancel token.
    CancelToken {
        /// Opaque cancel token returned at creation.
        token: String,
    },

    /// Process one batch of due messages and exit.
    Tick,

    /// Run the scheduler loop, processing due messages on an interval.
    Watch {
        /// Seconds between scheduler ticks (overrides the config file).
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}
