use std::sync::Mutex;

// Process-global env mutation must not interleave across parallel tests.
static ENV_GUARD: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily set (`Some`) or
/// removed (`None`), restoring the previous values afterwards, panics
/// included.
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_GUARD.lock().unwrap_or_else(|e| e.into_inner());
    let _restore = EnvRestore::apply(changes);
    f()
}

/// Undoes a set of env changes on drop. Previous values are recorded as
/// each change is applied and replayed in reverse, so a key listed twice
/// still ends up with its original value.
struct EnvRestore {
    previous: Vec<(String, Option<String>)>,
}

impl EnvRestore {
    fn apply(changes: &[(&str, Option<&str>)]) -> Self {
        let mut previous = Vec::with_capacity(changes.len());
        for (key, value) in changes {
            previous.push((key.to_string(), std::env::var(key).ok()));
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
        Self { previous }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        while let Some((key, value)) = self.previous.pop() {
            match value {
                Some(v) => std::env::set_var(&key, v),
                None => std::env::remove_var(&key),
            }
        }
    }
}
