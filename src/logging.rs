// ------------------------------------------------------------------
//  Logging (C10)
// ------------------------------------------------------------------
//
// `-v` count maps to a default level filter; `RUST_LOG` still wins if
// set, per env_logger's normal precedence. Grounded in the teacher's
// single-call logging setup (its `log.rs` initialized one global sink
// at startup), generalized from a bespoke writer to `env_logger` since
// this crate pulls in the `log` facade rather than rolling its own.

use log::LevelFilter;

pub fn init(verbose: u8) {
  let default_level = match verbose {
    0 => LevelFilter::Info,
    1 => LevelFilter::Debug,
    _ => LevelFilter::Trace,
  };

  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level.as_str())).format_timestamp_millis().init();
}
