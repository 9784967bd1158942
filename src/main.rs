mod commands;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use resync::{HttpBackend, ListParams, MutationKind, MutationRequest, SyncClient};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "resync")]
#[command(about = "Browse and edit collection/record APIs through a coherent cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/resync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base URL, overriding the config file
  #[arg(long)]
  url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List all collections
  #[command(visible_alias = "c")]
  Collections,

  /// List records of a collection
  #[command(visible_alias = "ls")]
  List {
    slug: String,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    offset: Option<u32>,
    /// Free-text search
    #[arg(short, long)]
    q: Option<String>,
    /// Exact-match filter as name=value (repeatable)
    #[arg(short, long = "filter")]
    filters: Vec<String>,
  },

  /// Show one record
  Get { slug: String, id: String },

  /// Create a record from name=value fields
  Create { slug: String, fields: Vec<String> },

  /// Replace all fields of a record
  Replace {
    slug: String,
    id: String,
    fields: Vec<String>,
  },

  /// Update some fields of a record
  Patch {
    slug: String,
    id: String,
    fields: Vec<String>,
  },

  /// Delete a record
  #[command(visible_alias = "rm")]
  Delete { slug: String, id: String },

  /// Keep a listing open, printing it whenever it changes
  Watch {
    slug: String,
    /// Seconds between refetches
    #[arg(long, default_value_t = 5)]
    interval: u64,
    /// Number of refetches before exiting
    #[arg(long, default_value_t = 12)]
    ticks: u32,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override URL if specified on command line
  if let Some(url) = args.url {
    config.api.url = Some(url);
  }

  let _log_guard = logging::init(&config.logging)?;

  let backend = HttpBackend::new(config.api_url()?, config.timeout())?;
  let client = SyncClient::new(backend);

  run(&client, &config, args.command).await
}

async fn run(client: &SyncClient, config: &config::Config, command: Command) -> Result<()> {
  match command {
    Command::Collections => {
      let collections = client.collections().await?;
      println!("{}", commands::render_collections(&collections.data));
    }
    Command::List {
      slug,
      limit,
      offset,
      q,
      filters,
    } => {
      let params = list_params(config, limit, offset, q, &filters)?;
      let page = client.listing(&slug, params).await?;
      println!("{}", commands::render_page(&page.data));
    }
    Command::Get { slug, id } => {
      let record = client.record(&slug, &id).await?;
      println!("{}", commands::render_record(&record.data)?);
    }
    Command::Create { slug, fields } => {
      let fields = commands::parse_assignments(&fields)?;
      let output = client
        .use_mutation(MutationKind::Create, &slug)
        .call(MutationRequest::new(fields))
        .await?;
      if let Some(record) = output.record() {
        println!("{}", commands::render_record(record)?);
      }
    }
    Command::Replace { slug, id, fields } => {
      let fields = commands::parse_assignments(&fields)?;
      let output = client
        .use_mutation(MutationKind::Replace, &slug)
        .call(MutationRequest::for_record(id, fields))
        .await?;
      if let Some(record) = output.record() {
        println!("{}", commands::render_record(record)?);
      }
    }
    Command::Patch { slug, id, fields } => {
      let fields = commands::parse_assignments(&fields)?;
      let output = client
        .use_mutation(MutationKind::Patch, &slug)
        .call(MutationRequest::for_record(id, fields))
        .await?;
      if let Some(record) = output.record() {
        println!("{}", commands::render_record(record)?);
      }
    }
    Command::Delete { slug, id } => {
      client
        .use_mutation(MutationKind::Delete, &slug)
        .call(MutationRequest::delete(id.clone()))
        .await?;
      println!("Deleted {}/{}", slug, id);
    }
    Command::Watch {
      slug,
      interval,
      ticks,
    } => {
      let params = list_params(config, None, None, None, &[])?;
      watch(client, &slug, params, Duration::from_secs(interval.max(1)), ticks).await;
    }
  }

  Ok(())
}

/// Flags and `-f name=value` filters go through one set of pairs, so a
/// filter naming `limit`, `offset` or `q` lands on the typed field and a
/// clash with the matching flag is rejected as a duplicate.
fn list_params(
  config: &config::Config,
  limit: Option<u32>,
  offset: Option<u32>,
  q: Option<String>,
  filters: &[String],
) -> Result<ListParams> {
  let filters = commands::parse_filters(filters)?;
  let filtered_limit = filters.iter().any(|(name, _)| name == "limit");
  let limit = match limit {
    Some(limit) => Some(limit),
    None if filtered_limit => None,
    None => config.listing.default_limit,
  };

  let mut pairs = vec![
    ("limit".to_string(), limit.map(|l| l.to_string())),
    ("offset".to_string(), offset.map(|o| o.to_string())),
    ("q".to_string(), q),
  ];
  pairs.extend(filters.into_iter().map(|(name, value)| (name, Some(value))));

  Ok(ListParams::from_pairs(pairs)?)
}

async fn watch(client: &SyncClient, slug: &str, params: ListParams, every: Duration, ticks: u32) {
  let mut listing = client.use_listing(slug, params);
  let mut ticker = tokio::time::interval(every);
  // The first tick completes immediately; the initial load is already running.
  ticker.tick().await;

  info!(slug, ticks, "watching listing");
  let mut remaining = ticks;
  loop {
    tokio::select! {
      changed = listing.next() => {
        if changed {
          println!("{}\n", commands::render_state(listing.state()));
        }
      }
      _ = ticker.tick() => {
        if remaining == 0 {
          break;
        }
        remaining -= 1;
        listing.refetch();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reserved_filter_sets_typed_field() {
    let config = config::Config::default();
    let params = list_params(&config, None, None, None, &["limit=10".to_string()]).unwrap();
    assert_eq!(params, ListParams::new().limit(10));

    let clash = list_params(&config, Some(5), None, None, &["limit=10".to_string()]);
    assert!(clash.is_err());
  }

  #[test]
  fn test_default_limit_yields_to_filter() {
    let mut config = config::Config::default();
    config.listing.default_limit = Some(25);

    let params = list_params(&config, None, None, None, &[]).unwrap();
    assert_eq!(params.get_limit(), Some(25));

    let params = list_params(&config, None, None, None, &["limit=3".to_string()]).unwrap();
    assert_eq!(params.get_limit(), Some(3));
  }
}
