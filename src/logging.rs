//! Logging init, using the `log` + `pretty_env_logger` pair the teacher
//! crate already carried in its `Cargo.toml` (it just never wired it up).
//!
//! Call `init()` once at process start, before any subsystem runs. Level
//! is controlled the standard `env_logger` way via `RUST_LOG`; absent that,
//! default to `info`.

pub fn init() {
  if std::env::var_os("RUST_LOG").is_none() {
    std::env::set_var("RUST_LOG", "info");
  }
  // Safe to call multiple times in tests; pretty_env_logger::try_init
  // ignores the "already initialized" error rather than panicking.
  let _ = pretty_env_logger::try_init();
}
