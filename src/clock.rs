use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_NANOS: AtomicU64 = AtomicU64::new(0);

pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

fn wall_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Wall-clock nanoseconds, strictly increasing across every caller in the
/// process. Row sort versions and change timestamps are drawn from here so
/// two writes never share a stamp, even when the OS clock stalls or steps
/// backwards.
pub fn monotonic_nanos() -> u64 {
    let wall = wall_nanos();
    let mut prev = LAST_NANOS.load(Ordering::Relaxed);
    loop {
        let next = wall.max(prev + 1);
        match LAST_NANOS.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{monotonic_nanos, now_micros};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[test]
    fn monotonic_nanos_never_repeats_within_thread() {
        let mut last = monotonic_nanos();
        for _ in 0..10_000 {
            let next = monotonic_nanos();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn monotonic_nanos_is_unique_across_threads() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    let local: Vec<u64> = (0..2_000).map(|_| monotonic_nanos()).collect();
                    let mut seen = seen.lock().expect("seen mutex");
                    for v in local {
                        assert!(seen.insert(v), "duplicate stamp {v}");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join");
        }
    }

    #[test]
    fn monotonic_nanos_tracks_wall_clock() {
        let micros = now_micros();
        let nanos = monotonic_nanos();
        assert!(nanos / 1_000 >= micros);
    }
}
