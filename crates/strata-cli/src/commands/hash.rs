use std::sync::Arc;

use anyhow::Result;
use strata_cache::RemoteStore;

use crate::cli::{HashSetArgs, OutputFormat};
use crate::output::{print_hash, print_missing, print_success};

pub async fn set(store: &Arc<dyn RemoteStore>, args: &HashSetArgs) -> Result<()> {
    store.hash_set(&args.key, &args.fields).await?;
    print_success(&format!("Set {} field(s) on {}", args.fields.len(), args.key));
    Ok(())
}

pub async fn get(store: &Arc<dyn RemoteStore>, key: &str, field: &str) -> Result<()> {
    match store.hash_get(key, field).await? {
        Some(value) => println!("{value}"),
        None => print_missing(&format!("{key}.{field}")),
    }
    Ok(())
}

pub async fn all(store: &Arc<dyn RemoteStore>, key: &str, format: OutputFormat) -> Result<()> {
    let fields = store.hash_get_all(key).await?;
    if fields.is_empty() {
        print_missing(key);
    } else {
        print_hash(&fields, format);
    }
    Ok(())
}
