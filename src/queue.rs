//! Queue position rendering for pending runs.
//!
//! Nothing here is persisted: the position is recomputed from the run
//! table on every view. Ordering is by run id, the proxy for creation
//! order; the runner is expected to claim runs first-created-first-run,
//! and this module does not enforce that.

/// English ordinal suffix rendering: 1 -> "1st", 2 -> "2nd", 11 -> "11th",
/// 21 -> "21st".
pub fn ordinal(n: i64) -> String {
    let suffix = if (4..=20).contains(&(n % 100)) {
        "th"
    } else {
        match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{}{}", n, suffix)
}

/// Human-readable queue position given how many runs are strictly ahead.
/// Zero ahead means the run is up next.
pub fn position_label(ahead: i64) -> String {
    if ahead == 0 {
        "next".to_string()
    } else {
        ordinal(ahead)
    }
}

/// The sentence shown atop the queue page.
pub fn summary_text(pending: usize) -> String {
    match pending {
        0 => "There are no test runs currently in the queue.".to_string(),
        1 => "There is one test run in the queue.".to_string(),
        n => format!("There are {} test runs currently in the queue.", n),
    }
}
