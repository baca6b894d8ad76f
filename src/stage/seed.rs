//! Seed data
//!
//! Populates the store with the records read queries sample from.

use std::collections::HashSet;

use rand::Rng;

use super::id::generate_id;
use crate::repository::{RepositoryError, StoreRecord, StoreRepository};

/// Records inserted per campaign
pub const SEED_RECORD_COUNT: usize = 10_000;

const LOREM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. \
    Praesent in lacinia magna. Aenean vitae maximus sem. \
    Quisque pharetra augue et mollis sollicitudin. \
    Mauris vehicula eros lorem. Donec non sodales neque. \
    Nullam malesuada ligula vel enim mattis tincidunt. \
    Praesent non ornare nunc, at vehicula leo. \
    Aenean et placerat orci. Nullam faucibus sodales diam vel volutpat. \
    Nulla tempor quis quam in ullamcorper.";

/// Generate `count` records with pairwise distinct ids
pub fn build_seed_records<R: Rng>(count: usize, rng: &mut R) -> Vec<StoreRecord> {
    let mut seen = HashSet::with_capacity(count);
    let mut records = Vec::with_capacity(count);

    while records.len() < count {
        let store_id = generate_id(rng);
        if !seen.insert(store_id.clone()) {
            continue;
        }
        records.push(StoreRecord {
            store_id,
            name: format!("name: {}", records.len()),
            huge_value: LOREM.to_string(),
        });
    }

    records
}

/// Clear any previous data, insert a fresh seed set and return its ids
pub async fn ensure_data<R: Rng>(
    repository: &dyn StoreRepository,
    rng: &mut R,
) -> Result<Vec<String>, RepositoryError> {
    let existing = repository.count().await?;
    if existing > 0 {
        tracing::info!(existing, "Clearing previous records");
        repository.clear().await?;
    }

    let records = build_seed_records(SEED_RECORD_COUNT, rng);
    repository.insert(&records).await?;
    tracing::info!(inserted = records.len(), "Seed data inserted");

    Ok(records.into_iter().map(|r| r.store_id).collect())
}
