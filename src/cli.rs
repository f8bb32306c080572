use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Base directory for config, snapshot, records and uploads.
    /// Defaults to ~/.facematch
    #[clap(long)]
    pub base_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the recognition API as a service.
    Daemon {},

    /// Convert a legacy JSON embedding export into a snapshot.
    ///
    /// The export is an object mapping `CATEGORY__FILENAME` keys to float
    /// arrays; keys are split into category and file id once, here.
    Import {
        /// Path of the legacy JSON export
        input: String,

        /// Snapshot to write; defaults to the configured snapshot path
        #[clap(short, long)]
        output: Option<String>,
    },

    /// Print header stats of a snapshot.
    Inspect {
        /// Snapshot to read; defaults to the configured snapshot path
        #[clap(short, long)]
        snapshot: Option<String>,
    },

    /// Recognize a local image file against the snapshot, without the server.
    Match {
        /// Path of the image to recognize
        image: String,

        /// Override the configured acceptance threshold
        #[clap(short, long)]
        threshold: Option<f32>,
    },
}
