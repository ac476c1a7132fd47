use std::path::Path;

use clap::{Parser, Subcommand};

use docmirror::config::Config;
use docmirror::daemon::SchedulerHandle;
use docmirror::index::Indexer;
use docmirror::sync::{
    GitCli, GitMirror, GitProvider, MirrorLock, Provider, RevisionSync, Syncer, bootstrap,
    lock_path_for,
};
use docmirror::types::BranchName;

#[derive(Parser)]
#[command(
    name = "docmirror",
    about = "Mirror a documentation repository and index its documents"
)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone the remote into the mirror path
    Clone,

    /// Set up a local branch tracking origin/<branch> (files are not touched)
    Checkout {
        /// Branch to track
        branch: BranchName,
    },

    /// Print the commit an expression resolves to
    Resolve {
        /// Branch, remote-tracking branch, commit id or HEAD
        expr: String,
    },

    /// Fetch and hard reset the mirror to the tip of the branch
    Sync,

    /// List the documents under the document root
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Keep the mirror in sync until interrupted
    Run,

    /// Check dependencies
    Doctor,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Commands::Clone => cmd_clone(&config),
        Commands::Checkout { branch } => cmd_checkout(&config, &branch),
        Commands::Resolve { expr } => cmd_resolve(&config, &expr),
        Commands::Sync => cmd_sync(&config),
        Commands::List { json } => cmd_list(&config, json),
        Commands::Run => cmd_run(&config),
        Commands::Doctor => cmd_doctor(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if e.to_string().contains("no repository at this path") {
            eprintln!();
            eprintln!("Hint: Create the mirror with: docmirror clone --remote <url>");
        }
        std::process::exit(1);
    }
}

fn provider(config: &Config) -> GitProvider {
    GitProvider::new(GitCli::with_path(&config.git))
}

/// Open the mirror, checking its origin against `--remote` when one is set.
fn open(config: &Config) -> Result<GitMirror, Box<dyn std::error::Error>> {
    let provider = provider(config);
    let mirror = match config.remote.as_deref() {
        Some(remote) if !remote.is_empty() => provider.open_mirror(&config.mirror, remote)?,
        _ => provider.open_existing(&config.mirror)?,
    };
    Ok(mirror)
}

fn syncer(config: &Config, mirror: GitMirror) -> Syncer<GitMirror> {
    let lock_path = lock_path_for(mirror.path());
    Syncer::new(mirror, config.branch.clone()).with_lock_file(lock_path)
}

fn cmd_clone(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let remote = config.remote()?;
    println!("Cloning {}...", remote);

    let mirror = provider(config).clone_mirror(&config.mirror, remote)?;
    let head = mirror.resolve_revision("HEAD")?;

    println!("Cloned into {}", mirror.path().display());
    println!(
        "  Branch: {}",
        mirror
            .branch()
            .map(|b| b.to_string())
            .unwrap_or_else(|| "(detached)".to_string())
    );
    println!("  Commit: {}", head.short());

    Ok(())
}

fn cmd_checkout(config: &Config, branch: &BranchName) -> Result<(), Box<dyn std::error::Error>> {
    let mirror = open(config)?;
    // Same lock as `sync` and `run`, so HEAD never moves under a reset.
    syncer(config, mirror).checkout(branch.clone())?;

    println!("Tracking {} on {}", branch.remote_tracking(), branch);
    println!("Hint: Run `docmirror --branch {} sync` to update the files", branch);

    Ok(())
}

fn cmd_resolve(config: &Config, expr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mirror = open(config)?;
    println!("{}", mirror.resolve_revision(expr)?);
    Ok(())
}

fn cmd_sync(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mirror = open(config)?;
    println!("Syncing {}...", config.branch);

    let outcome = syncer(config, mirror).sync()?;

    match &outcome.previous {
        Some(previous) if !outcome.changed() => {
            println!("Already up to date at {}", previous.short());
        }
        Some(previous) => {
            println!("Updated {} -> {}", previous.short(), outcome.current.short());
        }
        None => println!("Checked out {}", outcome.current.short()),
    }

    Ok(())
}

fn cmd_list(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let doc_root = config.doc_root_path();
    let mut indexer = Indexer::new(&doc_root).with_url_prefix(&config.url_prefix);
    if doc_root == config.mirror {
        indexer = indexer.skip_vcs_metadata();
    }
    let entries = indexer.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No documents under {}", indexer.root().display());
        return Ok(());
    }

    println!("{:<10} {}", "APP", "URL");
    println!("{}", "-".repeat(60));
    for entry in entries {
        println!("{:<10} {}", entry.category, entry.url);
    }

    Ok(())
}

fn cmd_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let remote = config.remote()?;
    let mirror = bootstrap(&provider(config), &config.mirror, remote, &config.branch)?;

    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;

    log::info!(
        "Mirroring {} ({}) into {}",
        remote,
        config.branch,
        config.mirror.display()
    );
    let mut handle = SchedulerHandle::spawn(syncer(config, mirror), config.interval());

    // Block until Ctrl-C, then stop the scheduler between passes.
    let _ = rx.recv();
    log::info!("Interrupted, stopping");
    handle.shutdown();

    Ok(())
}

fn cmd_doctor(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("docmirror System Check\n");

    // Check git
    let git = GitCli::with_path(&config.git);
    let version = git.version();
    println!(
        "[{}] git: {}",
        if version.is_ok() { "OK" } else { "FAIL" },
        match &version {
            Ok(v) => v.clone(),
            Err(e) => format!("not usable ({})", e),
        }
    );

    // Check remote
    println!(
        "[{}] Remote: {}",
        if config.remote.is_some() { "OK" } else { "INFO" },
        config.remote.as_deref().unwrap_or("not configured")
    );

    // Check mirror
    let provider = provider(config);
    let mirror_ok = provider.mirror_exists(&config.mirror);
    println!(
        "[{}] Mirror: {}",
        if mirror_ok { "OK" } else { "INFO" },
        describe_mirror(&provider, &config.mirror)
    );

    // Check for a sync in progress
    if mirror_ok {
        let lock_path = lock_path_for(&config.mirror);
        let (status, detail) = match MirrorLock::try_acquire(&lock_path) {
            Ok(Some(_)) => ("OK", "free".to_string()),
            Ok(None) => ("INFO", "held (a sync or checkout is running)".to_string()),
            Err(e) => ("FAIL", format!("unusable ({})", e)),
        };
        println!("[{}] Mirror lock: {} {}", status, lock_path.display(), detail);
    }

    // Check document root
    let doc_root = config.doc_root_path();
    let doc_root_ok = doc_root.is_dir();
    println!(
        "[{}] Document root: {}",
        if doc_root_ok { "OK" } else { "INFO" },
        doc_root.display()
    );

    if version.is_err() {
        std::process::exit(1);
    }

    Ok(())
}

fn describe_mirror(provider: &GitProvider, path: &Path) -> String {
    if !provider.mirror_exists(path) {
        return format!("{} (not cloned)", path.display());
    }
    match provider.open_existing(path) {
        Ok(mirror) => {
            let head = mirror
                .resolve_revision("HEAD")
                .map(|rev| rev.short().to_string())
                .unwrap_or_else(|_| "no commits".to_string());
            let branch = mirror
                .branch()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "detached".to_string());
            format!("{} ({} at {})", path.display(), branch, head)
        }
        Err(e) => format!("{} ({})", path.display(), e),
    }
}
