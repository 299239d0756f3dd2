//! bucketsync CLI - publish a directory to an object store bucket.
//!
//! Walks a local directory, publishes every file through the reconciliation
//! pipeline and optionally deletes remote keys the directory no longer has.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use bucketsync_common::{ContentItem, Disposition, Error, Headers};
use bucketsync_storage::{create_default_registry, list_keys};
use bucketsync_sync::{
    HashCache, ItemStream, KeepRule, Pipeline, PublishOptions, Publisher, PublisherConfig,
    Reporter,
};

#[derive(Parser)]
#[command(name = "bucketsync")]
#[command(about = "bucketsync - Publish and mirror files to an object store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which bucket and store to talk to.
#[derive(Args, Debug, Clone, Default)]
struct Target {
    /// JSON publisher config; flags override its fields.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target bucket.
    #[arg(short, long)]
    bucket: Option<String>,

    /// Store kind ("local" or "memory").
    #[arg(long)]
    store: Option<String>,

    /// Root directory of the local store.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Hash cache file (default: .bucketsync-<bucket>).
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Retry transient store errors this many times.
    #[arg(long)]
    retries: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a directory.
    Publish {
        /// Directory to publish.
        dir: PathBuf,

        #[command(flatten)]
        target: Target,

        /// Extra header as "Name: value"; repeatable.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Ignore the cache and remote ETags; rewrite everything.
        #[arg(long)]
        force: bool,

        /// Never overwrite existing remote objects.
        #[arg(long)]
        create_only: bool,

        /// Show what would happen without writing.
        #[arg(long)]
        simulate: bool,

        /// Write every file without probing.
        #[arg(long)]
        put_only: bool,

        /// Delete remote keys under the prefix that are not in the directory.
        #[arg(long)]
        sync: bool,

        /// Key prefix for published files and the sync scope.
        #[arg(long, default_value = "")]
        prefix: String,

        /// Remote key never deleted by --sync; repeatable.
        #[arg(long)]
        keep: Vec<String>,

        /// Regex of remote keys never deleted by --sync; repeatable.
        #[arg(long)]
        keep_pattern: Vec<String>,

        /// Log one line per item; optionally only for these states.
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        report: Option<Vec<String>>,
    },

    /// Inspect or reset the hash cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// List remote keys under a prefix.
    List {
        #[command(flatten)]
        target: Target,

        /// Only keys starting with this prefix.
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print cached fingerprints.
    Show {
        #[command(flatten)]
        target: Target,
    },

    /// Empty the cache file.
    Clear {
        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Publish {
            dir,
            target,
            headers,
            force,
            create_only,
            simulate,
            put_only,
            sync,
            prefix,
            keep,
            keep_pattern,
            report,
        } => {
            let options = PublishOptions {
                force,
                create_only,
                simulate,
                put_only,
            };
            let keep = keep_rules(&keep, &keep_pattern)?;
            let report = report.map(|states| parse_states(&states)).transpose()?;
            let headers = parse_headers(&headers)?;
            let sync = sync.then_some(keep);

            cmd_publish(&dir, &target, headers, options, &prefix, sync, report).await
        }

        Commands::Cache { action } => match action {
            CacheAction::Show { target } => cmd_cache_show(&target).await,
            CacheAction::Clear { target } => cmd_cache_clear(&target).await,
        },

        Commands::List { target, prefix } => cmd_list(&target, &prefix).await,
    }
}

/// Merge the config file (if any) with command line flags.
async fn load_config(target: &Target) -> Result<PublisherConfig> {
    let mut config = match &target.config {
        Some(path) => PublisherConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PublisherConfig::default(),
    };

    if let Some(bucket) = &target.bucket {
        config.bucket = bucket.clone();
    }
    if let Some(store) = &target.store {
        config.store = store.clone();
    }
    if let Some(root) = &target.root {
        let root = serde_json::json!(root.to_string_lossy());
        match &mut config.store_options {
            serde_json::Value::Object(options) => {
                options.insert("root".to_string(), root);
            }
            other => *other = serde_json::json!({ "root": root }),
        }
    }
    if let Some(cache_file) = &target.cache_file {
        config.cache_file = Some(cache_file.clone());
    }
    if let Some(retries) = target.retries {
        config.retries = retries;
    }

    config.bucket_id().context("A bucket is required (--bucket or config)")?;
    Ok(config)
}

/// Parse repeated `Name: value` arguments.
fn parse_headers(raw: &[String]) -> Result<Headers> {
    let mut headers = Headers::new();
    for arg in raw {
        let (name, value) = arg
            .split_once(':')
            .map(|(n, v)| (n.trim(), v.trim()))
            .filter(|(n, _)| !n.is_empty())
            .ok_or_else(|| {
                Error::Config(format!("Malformed header '{}', expected 'Name: value'", arg))
            })?;
        headers.insert(name.to_string(), value.to_string());
    }
    Ok(headers)
}

fn keep_rules(exact: &[String], patterns: &[String]) -> Result<Vec<KeepRule>> {
    let mut rules: Vec<KeepRule> = exact.iter().map(KeepRule::exact).collect();
    for pattern in patterns {
        rules.push(KeepRule::pattern(pattern)?);
    }
    Ok(rules)
}

fn parse_states(raw: &[String]) -> Result<Vec<Disposition>> {
    raw.iter()
        .map(|s| Disposition::parse(s).map_err(anyhow::Error::from))
        .collect()
}

/// Key prefix ending in `/`, or empty.
fn key_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

/// Every file under `dir` with its relative key.
///
/// Keys use forward slashes and are sorted. Contents are not read.
async fn scan_dir(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("Failed to read directory {}", current.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }

            let relative = path
                .strip_prefix(dir)
                .context("File escaped the scanned directory")?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((path, key));
        }
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Content items for `files`, each read only when the pipeline pulls it.
fn read_files(files: Vec<(PathBuf, String)>, prefix: &str) -> ItemStream {
    let prefix = prefix.to_string();
    stream::iter(files)
        .then(move |(path, key)| {
            let key = format!("{}{}", prefix, key);
            async move {
                let content = tokio::fs::read(&path).await.map_err(|e| {
                    Error::Io(std::io::Error::new(
                        e.kind(),
                        format!("Failed to read {}: {}", path.display(), e),
                    ))
                })?;
                debug!("Read {} ({} bytes)", key, content.len());
                Ok::<_, Error>(ContentItem::new(key, content))
            }
        })
        .boxed()
}

/// Publish a directory.
async fn cmd_publish(
    dir: &Path,
    target: &Target,
    headers: Headers,
    options: PublishOptions,
    prefix: &str,
    sync: Option<Vec<KeepRule>>,
    report: Option<Vec<Disposition>>,
) -> Result<()> {
    let config = load_config(target).await?;
    let prefix = key_prefix(prefix);
    let files = scan_dir(dir).await?;
    info!(
        "Publishing {} files from {} to '{}'",
        files.len(),
        dir.display(),
        config.bucket
    );

    let publisher = Publisher::from_registry(config, &create_default_registry())
        .await
        .context("Failed to set up publisher")?;

    let mut pipeline =
        Pipeline::new(read_files(files, &prefix)).pipe(publisher.publish(headers, options));
    if !options.simulate {
        pipeline = pipeline.pipe(publisher.cache());
        if let Some(keep) = sync {
            pipeline = pipeline.pipe(publisher.sync(prefix.as_str(), keep));
        }
    }
    if let Some(states) = report {
        pipeline = pipeline.pipe(Reporter::new(states));
    }

    let summary = pipeline.run().await.context("Publish failed")?;

    println!("Published {} items:", summary.items.len());
    for disposition in Disposition::ALL {
        let count = summary.count(disposition);
        if count > 0 {
            println!("  {:<8} {}", disposition, count);
        }
    }

    Ok(())
}

/// Print cached fingerprints.
async fn cmd_cache_show(target: &Target) -> Result<()> {
    let config = load_config(target).await?;
    let path = config.cache_path()?;
    let cache = HashCache::load(&path).await;

    if cache.is_empty() {
        println!("Cache {} is empty.", path.display());
        return Ok(());
    }

    println!("Cache {} ({} entries):", path.display(), cache.len());
    for (key, fingerprint) in cache.entries() {
        println!("  {} {}", fingerprint, key);
    }
    Ok(())
}

/// Reset the cache to empty.
async fn cmd_cache_clear(target: &Target) -> Result<()> {
    let config = load_config(target).await?;
    let path = config.cache_path()?;

    HashCache::new(&path)
        .flush()
        .await
        .with_context(|| format!("Failed to clear cache {}", path.display()))?;

    println!("Cache {} cleared.", path.display());
    Ok(())
}

/// List remote keys.
async fn cmd_list(target: &Target, prefix: &str) -> Result<()> {
    let config = load_config(target).await?;
    let bucket = config.bucket_id()?;
    let store = create_default_registry()
        .resolve(&config.store, &bucket, &config.store_options)
        .context("Failed to open store")?;

    let mut keys = list_keys(store, prefix);
    let mut count = 0;
    while let Some(key) = keys.next().await {
        println!("{}", key.context("Listing failed")?);
        count += 1;
    }

    info!("{} keys under '{}'", count, prefix);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "Cache-Control: max-age=300".to_string(),
            "x-meta:a:b".to_string(),
        ])
        .unwrap();

        assert_eq!(headers["Cache-Control"], "max-age=300");
        assert_eq!(headers["x-meta"], "a:b");
    }

    #[test]
    fn test_parse_headers_rejects_malformed() {
        assert!(parse_headers(&["no-colon".to_string()]).is_err());
        assert!(parse_headers(&[": value".to_string()]).is_err());
    }

    #[test]
    fn test_keep_rules() {
        let rules =
            keep_rules(&["robots.txt".to_string()], &["^uploads/".to_string()]).unwrap();
        assert_eq!(rules.len(), 2);
        assert!(keep_rules(&[], &["(".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_scan_dir_normalizes_keys() {
        let temp = TempDir::new().unwrap();
        tokio::fs::create_dir_all(temp.path().join("css/vendor")).await.unwrap();
        tokio::fs::write(temp.path().join("index.html"), "<p>hi</p>").await.unwrap();
        tokio::fs::write(temp.path().join("css/vendor/reset.css"), "*{}").await.unwrap();

        let files = scan_dir(temp.path()).await.unwrap();
        let items: Vec<ContentItem> = read_files(files, "site/")
            .map(|item| item.unwrap())
            .collect()
            .await;
        let keys: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();

        assert_eq!(keys, vec!["site/css/vendor/reset.css", "site/index.html"]);
        assert_eq!(items[1].content.as_deref(), Some(&b"<p>hi</p>"[..]));
    }

    #[test]
    fn test_key_prefix_adds_separator() {
        assert_eq!(key_prefix(""), "");
        assert_eq!(key_prefix("site"), "site/");
        assert_eq!(key_prefix("site/"), "site/");
        assert_eq!(key_prefix("a/b"), "a/b/");
    }

    #[tokio::test]
    async fn test_files_are_read_when_pulled() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join("a.txt"), "a").await.unwrap();
        tokio::fs::write(temp.path().join("b.txt"), "b").await.unwrap();

        let files = scan_dir(temp.path()).await.unwrap();
        // Removed after the scan but before the stream reaches it.
        tokio::fs::remove_file(temp.path().join("b.txt")).await.unwrap();

        let mut items = read_files(files, "");
        assert_eq!(items.next().await.unwrap().unwrap().path, "a.txt");
        let err = items.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("b.txt"));
        assert!(items.next().await.is_none());
    }

    #[test]
    fn test_cli_parses_publish() {
        let cli = Cli::try_parse_from([
            "bucketsync", "publish", "dist", "--bucket", "site", "--root", "/tmp/bucket",
            "--sync", "--keep", "robots.txt", "--report", "create,update",
        ])
        .unwrap();

        match cli.command {
            Commands::Publish { dir, target, sync, keep, report, .. } => {
                assert_eq!(dir, PathBuf::from("dist"));
                assert_eq!(target.bucket.as_deref(), Some("site"));
                assert!(sync);
                assert_eq!(keep, vec!["robots.txt".to_string()]);
                assert_eq!(report, Some(vec!["create".to_string(), "update".to_string()]));
            }
            _ => panic!("expected publish"),
        }
    }

    #[tokio::test]
    async fn test_load_config_applies_flags() {
        let target = Target {
            bucket: Some("site".to_string()),
            root: Some(PathBuf::from("/srv/bucket")),
            retries: Some(2),
            ..Default::default()
        };

        let config = load_config(&target).await.unwrap();
        assert_eq!(config.store, "local");
        assert_eq!(config.store_options["root"], "/srv/bucket");
        assert_eq!(config.retries, 2);

        assert!(load_config(&Target::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_to_local_store() {
        let site = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        tokio::fs::write(site.path().join("a.txt"), "a").await.unwrap();

        let target = Target {
            bucket: Some("site".to_string()),
            root: Some(bucket.path().to_path_buf()),
            cache_file: Some(bucket.path().join("cache.json")),
            ..Default::default()
        };

        cmd_publish(
            site.path(),
            &target,
            Headers::new(),
            PublishOptions::default(),
            "",
            None,
            None,
        )
        .await
        .unwrap();

        assert_eq!(tokio::fs::read(bucket.path().join("a.txt")).await.unwrap(), b"a".to_vec());
        let cache = HashCache::load(bucket.path().join("cache.json")).await;
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_prefix_without_slash_scopes_keys_and_sync() {
        let site = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        tokio::fs::write(site.path().join("a.txt"), "a").await.unwrap();
        tokio::fs::create_dir_all(bucket.path().join("site")).await.unwrap();
        tokio::fs::write(bucket.path().join("site/old.txt"), "old").await.unwrap();
        tokio::fs::write(bucket.path().join("site-assets.txt"), "other").await.unwrap();

        let target = Target {
            bucket: Some("site".to_string()),
            root: Some(bucket.path().to_path_buf()),
            cache_file: Some(bucket.path().join("cache.json")),
            ..Default::default()
        };

        cmd_publish(
            site.path(),
            &target,
            Headers::new(),
            PublishOptions::default(),
            "site",
            Some(Vec::new()),
            None,
        )
        .await
        .unwrap();

        assert!(bucket.path().join("site/a.txt").exists());
        assert!(!bucket.path().join("site/old.txt").exists());
        // Shares the bare prefix but lies outside "site/".
        assert!(bucket.path().join("site-assets.txt").exists());
    }
}
