//! `opds cache`: inspect or clear the persisted checksum cache.

use std::path::Path;

use opds_cache::{CacheStats, ChecksumCache, LoadOutcome, CACHE_FILE_NAME};

use crate::{CacheCommand, GlobalArgs};

/// Runs an `opds cache` action against the profile's catalog folder.
pub fn run(action: CacheCommand, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let profile = global.load_profile()?;
    let catalog_root = profile.catalog_root();
    match action {
        CacheCommand::Clear => {
            crate::build::clear_cache(&catalog_root);
            if !global.quiet {
                eprintln!(
                    "   Cleared {}",
                    catalog_root.join(CACHE_FILE_NAME).display()
                );
            }
            Ok(0)
        }
        CacheCommand::Stats => {
            let (outcome, stats) = inspect(&catalog_root);
            println!("{}", describe(&catalog_root, outcome, stats));
            Ok(if outcome == LoadOutcome::Failed { 1 } else { 0 })
        }
    }
}

/// Loads the cache kept in `catalog_root` without touching it.
fn inspect(catalog_root: &Path) -> (LoadOutcome, CacheStats) {
    let mut cache = ChecksumCache::new();
    cache.configure_location(catalog_root);
    let outcome = cache.initialize();
    (outcome, cache.stats())
}

fn describe(catalog_root: &Path, outcome: LoadOutcome, stats: CacheStats) -> String {
    let file = catalog_root.join(CACHE_FILE_NAME);
    let state = match outcome {
        LoadOutcome::Unconfigured => "no location".to_string(),
        LoadOutcome::Missing => "not created yet".to_string(),
        LoadOutcome::ColdStart => "written by an incompatible version, will be rebuilt".to_string(),
        LoadOutcome::Failed => "unreadable".to_string(),
        LoadOutcome::Loaded { added, discarded } => {
            format!("{added} entries loaded, {discarded} duplicates discarded")
        }
    };
    format!(
        "{}: {state}\n  entries: {}\n  with checksum: {}\n  inherited: {}",
        file.display(),
        stats.entries,
        stats.known,
        stats.inherited
    )
}
