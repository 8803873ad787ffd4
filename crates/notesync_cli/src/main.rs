//! Command-line front end over the notesync sync core.
//!
//! # Responsibility
//! - Map subcommands onto single sync core operations.
//! - Print the resulting view; no business rules live here.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use notesync_core::{
    default_log_level, init_logging, LocalStore, ProviderRegistry, Record, RecordDraft,
    RecordPatch, RemoteConfig, SqliteLocalStore, SyncCore,
};
use uuid::Uuid;

/// notesync - keep notes in a local store or a remote document store
#[derive(Debug, Parser)]
#[command(name = "notesync", version, about)]
struct Cli {
    /// SQLite database holding the local store
    #[arg(long, global = true, default_value = "notesync.db", env = "NOTESYNC_DB")]
    db: PathBuf,

    /// Absolute directory for rotating log files; logging is off when absent
    #[arg(long, global = true, env = "NOTESYNC_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level used with --log-dir
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List records, newest first
    List {
        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a record
    Add {
        content: String,
        #[arg(long)]
        title: Option<String>,
        /// Comma-separated tag names
        #[arg(short, long)]
        tags: Option<String>,
        #[arg(long)]
        flag: bool,
    },
    /// Change fields of an existing record
    Update {
        id: Uuid,
        #[arg(long)]
        content: Option<String>,
        #[arg(long, conflicts_with = "clear_title")]
        title: Option<String>,
        #[arg(long)]
        clear_title: bool,
        /// Comma-separated tag names; replaces the record's tags
        #[arg(short, long)]
        tags: Option<String>,
        #[arg(long)]
        annotation: Option<String>,
    },
    /// Flip the favorite marker
    Toggle { id: Uuid },
    /// Delete a record
    Delete { id: Uuid },
    /// List registered tags
    Tags,
    /// Register tag names
    AddTag {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove a tag from the registry and every record
    DeleteTag { name: String },
    /// Write a backup envelope
    Export {
        /// Output file; stdout when absent
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Restore a backup envelope into the local store
    Import { file: PathBuf },
    /// Connect to a remote store and make it authoritative
    Connect {
        #[arg(long, env = "NOTESYNC_API_KEY")]
        api_key: String,
        #[arg(long)]
        project_id: String,
        #[arg(long, default_value = "firestore")]
        provider: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        poll_ms: Option<u64>,
    },
    /// Drop the remote store and return to the local store
    Disconnect,
    /// Reconnect with the saved remote configuration
    Reconnect,
    /// Copy local records and tags into the connected remote store
    Migrate,
    /// Show store and connection status
    Status,
    /// Print the record count whenever the remote feed delivers
    Watch {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = start_logging(&cli) {
        eprintln!("warning: {err:#}");
    }

    let outcome = open_core(&cli.db).and_then(|mut core| {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        run(cli.command, &mut core, &mut out)
    });

    if let Err(err) = outcome {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn start_logging(cli: &Cli) -> Result<()> {
    let Some(dir) = cli.log_dir.as_ref() else {
        return Ok(());
    };
    let level = cli.log_level.as_deref().unwrap_or(default_log_level());
    init_logging(level, dir).context("logging disabled")?;
    Ok(())
}

fn open_core(db: &Path) -> Result<SyncCore<SqliteLocalStore>> {
    let local = SqliteLocalStore::open(db)
        .with_context(|| format!("failed to open local store `{}`", db.display()))?;
    Ok(SyncCore::open(local, ProviderRegistry::with_defaults()))
}

fn run<L: LocalStore>(command: Command, core: &mut SyncCore<L>, out: &mut impl Write) -> Result<()> {
    match command {
        Command::List { json } => {
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(core.records())?)?;
            } else {
                for record in core.records() {
                    writeln!(out, "{}", summary_line(record))?;
                }
            }
        }
        Command::Add {
            content,
            title,
            tags,
            flag,
        } => {
            let mut draft = RecordDraft::new(content).flag(flag);
            if let Some(title) = title {
                draft = draft.title(title);
            }
            if let Some(tags) = tags.as_deref() {
                draft = draft.tags(split_tags(tags));
            }
            let record = core.create_record(draft)?;
            writeln!(out, "created {}", record.id)?;
        }
        Command::Update {
            id,
            content,
            title,
            clear_title,
            tags,
            annotation,
        } => {
            let mut patch = RecordPatch::default();
            if let Some(content) = content {
                patch = patch.content(content);
            }
            if clear_title {
                patch = patch.title(None);
            } else if let Some(title) = title {
                patch = patch.title(Some(title));
            }
            if let Some(tags) = tags.as_deref() {
                patch = patch.tags(split_tags(tags));
            }
            if let Some(annotation) = annotation {
                patch = patch.annotation(Some(annotation));
            }
            if patch.is_empty() {
                bail!("nothing to update; pass at least one field");
            }
            let record = core.update_record(id, patch)?;
            writeln!(out, "updated {}", record.id)?;
        }
        Command::Toggle { id } => {
            let record = core.toggle_flag(id)?;
            writeln!(out, "{} flag={}", record.id, record.flag)?;
        }
        Command::Delete { id } => {
            core.delete_record(id)?;
            writeln!(out, "deleted {id}")?;
        }
        Command::Tags => {
            for name in core.tags().names() {
                writeln!(out, "{name}")?;
            }
        }
        Command::AddTag { names } => {
            let added = core.add_tags(&names)?;
            writeln!(out, "added {}", added.len())?;
        }
        Command::DeleteTag { name } => {
            let untagged = core.delete_tag(&name)?;
            writeln!(out, "deleted tag `{}` from {untagged} records", name.trim())?;
        }
        Command::Export { out: path } => {
            let text = core.export().to_json_pretty()?;
            match path {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("failed to write `{}`", path.display()))?;
                    writeln!(out, "exported to {}", path.display())?;
                }
                None => writeln!(out, "{text}")?,
            }
        }
        Command::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read `{}`", file.display()))?;
            let summary = core.import_json(&text)?;
            writeln!(
                out,
                "imported {} records and {} tags",
                summary.records, summary.tags
            )?;
        }
        Command::Connect {
            api_key,
            project_id,
            provider,
            timeout_ms,
            poll_ms,
        } => {
            let mut config = RemoteConfig::new(api_key, project_id).with_provider(provider);
            config.request_timeout_ms = timeout_ms;
            config.poll_interval_ms = poll_ms;
            core.reconfigure_store(config)?;
            write_status(core, out)?;
        }
        Command::Disconnect => {
            core.disconnect_remote()?;
            write_status(core, out)?;
        }
        Command::Reconnect => {
            core.reconnect()?;
            write_status(core, out)?;
        }
        Command::Migrate => {
            if core.migrate()? {
                writeln!(out, "migration complete")?;
            } else {
                bail!("migration finished with failures; see the log for details");
            }
        }
        Command::Status => write_status(core, out)?,
        Command::Watch { seconds } => {
            if !core.is_remote() {
                bail!("watch needs a connected remote store");
            }
            let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
            while let Some(left) = deadline.checked_duration_since(std::time::Instant::now()) {
                if core.wait_for_feed(left) > 0 {
                    writeln!(out, "records={} tags={}", core.records().len(), core.tags().len())?;
                }
            }
        }
    }
    Ok(())
}

fn write_status<L: LocalStore>(core: &SyncCore<L>, out: &mut impl Write) -> Result<()> {
    let store = if core.is_remote() { "remote" } else { "local" };
    write!(out, "store={store} status={}", core.status())?;
    if let Some(owner) = core.owner_id() {
        write!(out, " owner={owner}")?;
    }
    if let Some(error) = core.last_error() {
        write!(out, " error=\"{error}\"")?;
    }
    writeln!(out, " records={}", core.records().len())?;
    Ok(())
}

fn summary_line(record: &Record) -> String {
    let marker = if record.flag { "*" } else { " " };
    let label = record.title.as_deref().unwrap_or(record.content.as_str());
    let label: String = label.lines().next().unwrap_or_default().chars().take(60).collect();
    if record.tags.is_empty() {
        format!("{marker} {} {label}", record.id)
    } else {
        format!("{marker} {} {label} [{}]", record.id, record.tags.join(", "))
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{run, split_tags, Cli, Command};
    use clap::Parser;
    use notesync_core::{ProviderRegistry, SqliteLocalStore, SyncCore};

    fn core() -> SyncCore<SqliteLocalStore> {
        SyncCore::open(
            SqliteLocalStore::in_memory().unwrap(),
            ProviderRegistry::new(),
        )
    }

    fn run_line(core: &mut SyncCore<SqliteLocalStore>, args: &[&str]) -> String {
        let mut argv = vec!["notesync"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        let mut out = Vec::new();
        run(cli.command, core, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn parses_global_db_after_subcommand() {
        let cli = Cli::try_parse_from(["notesync", "list", "--db", "/tmp/x.db"]).unwrap();
        assert_eq!(cli.db.to_str(), Some("/tmp/x.db"));
        assert!(matches!(cli.command, Command::List { json: false }));
    }

    #[test]
    fn update_rejects_title_with_clear_title() {
        let id = uuid::Uuid::new_v4().to_string();
        let parsed = Cli::try_parse_from([
            "notesync",
            "update",
            id.as_str(),
            "--title",
            "x",
            "--clear-title",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn split_tags_drops_blanks() {
        assert_eq!(split_tags(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn add_then_list_and_status() {
        let mut core = core();
        let created = run_line(&mut core, &["add", "first idea", "--tags", "work, home"]);
        assert!(created.starts_with("created "));

        let listed = run_line(&mut core, &["list"]);
        assert!(listed.contains("first idea [work, home]"));

        let status = run_line(&mut core, &["status"]);
        assert_eq!(status.trim(), "store=local status=unconfigured records=1");
    }
}
