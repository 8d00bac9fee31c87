//! `cstorectl` — a small CLI over the content manager, operating against a
//! filesystem-backed repository directory. Not part of the library's public
//! contract; this is the kind of thin operational surface the snapshot
//! uploader and policy engine would sit behind in a full repository (spec.md
//! §1 "Out of scope").

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use content_manager::{
    CachingOptions, CancellationToken, ContentId, FormattingOptions, Manager,
};

#[derive(Parser)]
#[command(name = "cstorectl", version, about = "Content-addressable pack storage engine CLI")]
struct Cli {
    /// Repository directory: holds `blobs/` (pack + index blobs) and
    /// `state/` (local caches and the index-blob mirror).
    #[arg(short, long, default_value = "./cstore-repo")]
    repo: PathBuf,

    /// Repository passphrase, used to derive the master key via Argon2id.
    /// Omit for an unencrypted-at-rest test repository (zero key).
    #[arg(long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a file's bytes as one content, deduplicating against existing
    /// content. Prints the resulting content ID.
    Write {
        input: PathBuf,
        /// Single letter 'g'..'z' to route this content to the metadata
        /// cache/pack, or omit for a regular content.
        #[arg(short, long)]
        prefix: Option<char>,
    },
    /// Read one content's plaintext to stdout or a file.
    Read {
        id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Tombstone a content. Idempotent.
    Delete { id: String },
    /// Seal every pending pack and flush the index builder.
    Flush,
    /// List live content IDs (add --include-deleted to also show tombstones).
    Ls {
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long)]
        include_deleted: bool,
    },
    /// Group contents by the pack blob that holds them.
    LsPacks,
    /// Print operation counters.
    Stats,
    /// Scan every pack blob's recovery block and report index health,
    /// bypassing index blobs entirely.
    Recover {
        /// Write the recovered index as a new index blob and fold it into
        /// the committed index, so a subsequent `ls` sees what recovery
        /// found.
        #[arg(long)]
        commit: bool,
    },
}

fn open_manager(repo: &std::path::Path, password: Option<String>) -> content_manager::Result<Manager> {
    let store = content_manager::FilesystemBlobStore::new(repo.join("blobs"))?;
    let formatting = FormattingOptions {
        password,
        ..FormattingOptions::default()
    };
    Manager::new(
        Box::new(store),
        repo.join("state"),
        formatting,
        CachingOptions::default(),
        now_secs,
    )
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let mgr = open_manager(&cli.repo, cli.password.clone())?;

    match cli.command {
        Commands::Write { input, prefix } => {
            let data = std::fs::read(&input)?;
            let prefix_str = prefix.map(|c| c.to_string()).unwrap_or_default();
            let id = mgr.write_content(&data, &prefix_str)?;
            mgr.flush()?;
            println!("{id}");
        }
        Commands::Read { id, output } => {
            let data = mgr.get_content(&ContentId::parse(id))?;
            match output {
                Some(path) => std::fs::write(path, data)?,
                None => std::io::stdout().write_all(&data)?,
            }
        }
        Commands::Delete { id } => {
            mgr.delete_content(&ContentId::parse(id))?;
            mgr.flush()?;
        }
        Commands::Flush => {
            mgr.flush()?;
        }
        Commands::Ls { prefix, include_deleted } => {
            mgr.load_pack_indexes(&CancellationToken::new())?;
            mgr.iterate_contents(
                content_manager::IterateOptions {
                    prefix: &prefix,
                    include_deleted,
                },
                &CancellationToken::new(),
                |info| {
                    println!(
                        "{}\t{}\t{}\t{}",
                        info.id,
                        if info.deleted { "deleted" } else { "live" },
                        info.length,
                        info.pack_blob_id,
                    );
                    Ok(())
                },
            )?;
        }
        Commands::LsPacks => {
            mgr.load_pack_indexes(&CancellationToken::new())?;
            let packs = mgr.iterate_packs(
                content_manager::IterateOptions::default(),
                &CancellationToken::new(),
            )?;
            for pack in packs {
                println!(
                    "{}\t{} content(s)\t{} bytes",
                    pack.pack_id, pack.content_count, pack.total_size
                );
            }
        }
        Commands::Stats => {
            let snap = mgr.stats();
            println!("{snap:#?}");
        }
        Commands::Recover { commit } => {
            let report = mgr.recover_scan(&CancellationToken::new())?;
            println!("{}", report.summary());
            for blob in &report.blob_log {
                if !blob.health.is_usable() {
                    println!("  unreadable: {}", blob.blob_id);
                }
            }
            if commit {
                let blob_id = mgr.commit_recovery(&report)?;
                if blob_id.is_empty() {
                    println!("nothing to commit");
                } else {
                    println!("committed recovery index blob {blob_id}");
                }
            }
        }
    }

    Ok(())
}
