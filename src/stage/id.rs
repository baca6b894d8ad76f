//! Synthetic store identifiers

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of every generated id
pub const ID_LENGTH: usize = 32;

/// Random `[A-Za-z0-9]` identifier of [`ID_LENGTH`] characters
pub fn generate_id<R: Rng>(rng: &mut R) -> String {
    (0..ID_LENGTH)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}
