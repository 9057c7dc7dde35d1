//! # Thread Utilities

use core::str::FromStr;
use std::{env, num::NonZeroUsize, thread};

/// The search list of environment variables that Rayon uses to control parallelism.
pub const RAYON_VARS: &[&str] = &["RAYON_NUM_THREADS", "RAYON_RS_NUM_CPUS"];

/// Get the max parallelism available.
///
/// Scans `RAYON_VARS` before falling back to [`thread::available_parallelism`].
pub fn est_max_parallelism() -> usize {
    for name in RAYON_VARS {
        if let Some(x @ 1..) = env::var(name).ok().and_then(|s| usize::from_str(&s).ok()) {
            return x;
        }
    }

    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Resolve the max pool size.
///
/// ``min(max_pool, thread::available_parallelism() || env::var("RAYON_NUM_THREADS"))``
pub fn resolve_max_pool(max_pool: Option<NonZeroUsize>) -> usize {
    let sys_max = est_max_parallelism();

    let max_pool = max_pool.map(|x| x.get()).unwrap_or(sys_max);

    core::cmp::min(max_pool, sys_max)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_est_max_parallelism() {
        let mut orig_env: HashMap<String, Option<String>> = Default::default();

        for name in RAYON_VARS {
            orig_env.insert(name.to_string(), env::var(name).ok());
            unsafe { env::remove_var(name) };
        }

        let base = est_max_parallelism();
        assert!(base >= 1);

        for name in RAYON_VARS {
            unsafe { env::set_var(name, format!("{}", base + 12)) };
            assert_eq!(est_max_parallelism(), base + 12);
            unsafe { env::remove_var(name) };
        }

        assert_eq!(est_max_parallelism(), base);
        assert_eq!(resolve_max_pool(None), base);
        assert_eq!(resolve_max_pool(NonZeroUsize::new(1)), 1);
        assert_eq!(resolve_max_pool(NonZeroUsize::new(base + 100)), base);

        for (name, val) in orig_env {
            match val {
                Some(s) => unsafe { env::set_var(name, s) },
                None => unsafe { env::remove_var(name) },
            }
        }
    }
}
