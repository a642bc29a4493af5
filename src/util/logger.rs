//! Built-in logger (spec.md §7's ambient "logging" concern): initialized
//! from [`crate::gc::NonMovingGc::new`] so an embedder gets usable logs out
//! of the box. A binding that wants to integrate with its own logging
//! framework instead can disable the `builtin_env_logger` default feature
//! and register its own `log` implementation before constructing a
//! `NonMovingGc`.

/// Attempt to init an `env_logger` for this crate. Does nothing if the
/// `builtin_env_logger` feature is disabled.
pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            );
            match result {
                Ok(()) => log::debug!("nonmoving-gc initialized the logger."),
                Err(e) => log::debug!("nonmoving-gc failed to initialize the built-in env_logger: {e}"),
            }
        } else {
            log::debug!("nonmoving-gc didn't initialize the built-in env_logger; the \"builtin_env_logger\" feature is not enabled.");
        }
    }
}
