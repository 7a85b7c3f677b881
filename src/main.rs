use std::path::Path;

use clap::Parser;
use log::LevelFilter;

use chat_archive_ingest::dao::fs_dao::FsStore;
use chat_archive_ingest::drive::{parse_drive_url, DriveClient};
use chat_archive_ingest::pipeline::{ingest, IngestOptions, IngestOutcome};
use chat_archive_ingest::prelude::*;

#[derive(Parser)]
#[command(about = "Ingests an exported chat archive from a Google Drive folder \
                   into a normalized, de-duplicated message stream")]
struct Args {
    /// Google Drive directory holding the chat export
    google_drive_url: String,

    /// Save messages and media to the filesystem instead of the remote stores
    #[arg(long)]
    local: bool,

    /// Skip downloading and uploading media files
    #[arg(long)]
    skip_media: bool,

    /// Allow running without GLOBAL_SALT, at the cost of non-deterministic ids
    #[arg(long)]
    salt_not_required: bool,

    /// Log at debug level
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter(None, if args.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .init();

    match run(&args) {
        Ok(outcome) if outcome.all_conversations_failed() => {
            log::error!("Every conversation failed to merge");
            std::process::exit(1);
        }
        Ok(outcome) => {
            log::info!("Done: {} merged messages, {} inserted, {} media files",
                       outcome.merged_msg_count, outcome.inserted_msg_count, outcome.media_file_count);
        }
        Err(e) => {
            log::error!("{e:#}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<IngestOutcome> {
    let anonymizer = Anonymizer::from_env(args.salt_not_required)?;
    let drive_id = parse_drive_url(&args.google_drive_url)?;

    let api_key = std::env::var("GOOGLE_API_KEY")
        .map_err(|_| IngestError::InvalidConfig("GOOGLE_API_KEY is not set".to_owned()))?;
    let drive = DriveClient::new(&ReqwestHttpClient, api_key);

    // The remote document/object stores are wired in by the deployment through
    // the MessageStore/MediaSink traits; this binary ships the local sink.
    if !args.local {
        bail!(IngestError::InvalidConfig(
            "no remote store credentials are configured in this build, run with --local".to_owned()));
    }
    let mut store = FsStore::new(Path::new("."), &drive_id)?;
    let mut media_sink = FsStore::new(Path::new("."), &drive_id)?;

    ingest(&drive, &mut store, &mut media_sink, &anonymizer, &drive_id,
           &IngestOptions { skip_media: args.skip_media }, &CancelToken::new())
}
