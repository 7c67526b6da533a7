use crate::types::Reading;

/// Decide whether `candidate` warrants a new reading.
///
/// The first observation is always stored; afterwards any difference from the
/// last *persisted* value is stored. There is no tolerance: `46.2` and
/// `46.200001` are different readings.
pub fn should_store(candidate: f64, last_stored: Option<&Reading>) -> bool {
    match last_stored {
        None => true,
        Some(last) => candidate != last.value,
    }
}
