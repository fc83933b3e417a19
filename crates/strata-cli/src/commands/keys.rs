use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use strata_cache::{DistributedLock, RemoteStore};

use crate::cli::SetArgs;
use crate::output::{print_missing, print_success, render_bytes};

pub async fn ping(store: &Arc<dyn RemoteStore>, url: &str) -> Result<()> {
    store.ping().await?;
    println!("{}: {}", "Backend".cyan(), store.name());
    println!("{}: {}", "URL".cyan(), url);
    print_success("PONG");
    Ok(())
}

pub async fn get(store: &Arc<dyn RemoteStore>, key: &str) -> Result<()> {
    match store.get(key).await? {
        Some(bytes) => println!("{}", render_bytes(&bytes)),
        None => print_missing(key),
    }
    Ok(())
}

pub async fn set(store: &Arc<dyn RemoteStore>, args: &SetArgs) -> Result<()> {
    if args.ttl == 0 {
        anyhow::bail!("--ttl must be at least 1 second");
    }
    store
        .set(&args.key, args.value.as_bytes(), Duration::from_secs(args.ttl))
        .await?;
    print_success(&format!("Set {} (ttl {}s)", args.key, args.ttl));
    Ok(())
}

pub async fn delete(store: &Arc<dyn RemoteStore>, key: &str) -> Result<()> {
    if store.delete(key).await? {
        print_success(&format!("Deleted {key}"));
    } else {
        print_missing(key);
    }
    Ok(())
}

pub async fn exists(store: &Arc<dyn RemoteStore>, key: &str) -> Result<()> {
    let exists = store.exists(key).await?;
    println!("{exists}");
    Ok(())
}

pub async fn invalidate(store: &Arc<dyn RemoteStore>, pattern: &str) -> Result<()> {
    let deleted = store.delete_by_pattern(pattern).await?;
    print_success(&format!("Deleted {deleted} key(s) matching {pattern}"));
    Ok(())
}

pub async fn unlock(store: Arc<dyn RemoteStore>, key: &str) -> Result<()> {
    let lock = DistributedLock::new(store);
    if lock.force_release(key).await? {
        print_success(&format!("Released lock on {key}"));
    } else {
        println!("{} {}", "∅".yellow(), format!("no lock held on {key}").dimmed());
    }
    Ok(())
}
