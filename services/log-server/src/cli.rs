//! Command-line flags for `log-server`.
//!
//! Several flags (`--local`, `--network`, `--netcat`, `--socat`,
//! `--influxdb`, `--libpq`) take an *optional* argument: `--local` alone
//! means "enable with the default path", `--local /custom/path` means
//! "enable with this path". `clap`'s derive macros don't distinguish those
//! two shapes cleanly, so — matching the two-pass, hand-rolled
//! optional-field style `services/forwarder/src/config.rs` uses for its own
//! `Option<T>` fields — `log-server` walks the raw argument vector itself:
//! a flag consumes the next token as its value only if that token doesn't
//! itself look like a flag. Unknown flags are ignored.

use log_transport::{
    DEFAULT_TCP_INPUT_PORT, DEFAULT_TCP_OUTPUT_PORT, DEFAULT_UNIX_INPUT_PATH, DEFAULT_UNIX_OUTPUT_PATH,
};

/// Raw parse result: `None` means the flag wasn't given; `Some(None)` means
/// it was given with no value (use the default); `Some(Some(v))` means an
/// explicit value followed it.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub local: Option<Option<String>>,
    pub network: Option<Option<String>>,
    pub netcat: Option<Option<String>>,
    pub socat: Option<Option<String>>,
    pub ostream: bool,
    pub text_tree: bool,
    pub influxdb: Option<Option<String>>,
    pub libpq: Option<Option<String>>,
}

fn looks_like_a_flag(s: &str) -> bool {
    s.starts_with("--")
}

fn take_optional_value(args: &[String], at: usize) -> (Option<String>, usize) {
    match args.get(at + 1) {
        Some(next) if !looks_like_a_flag(next) => (Some(next.clone()), 2),
        _ => (None, 1),
    }
}

pub fn parse(args: &[String]) -> CliOptions {
    let mut opts = CliOptions::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--local" => {
                let (v, advance) = take_optional_value(args, i);
                opts.local = Some(v);
                i += advance;
            }
            "--network" => {
                let (v, advance) = take_optional_value(args, i);
                opts.network = Some(v);
                i += advance;
            }
            "--netcat" => {
                let (v, advance) = take_optional_value(args, i);
                opts.netcat = Some(v);
                i += advance;
            }
            "--socat" => {
                let (v, advance) = take_optional_value(args, i);
                opts.socat = Some(v);
                i += advance;
            }
            "--ostream" => {
                opts.ostream = true;
                i += 1;
            }
            "--text-tree" => {
                opts.text_tree = true;
                i += 1;
            }
            "--influxdb" => {
                let (v, advance) = take_optional_value(args, i);
                opts.influxdb = Some(v);
                i += advance;
            }
            "--libpq" => {
                let (v, advance) = take_optional_value(args, i);
                opts.libpq = Some(v);
                i += advance;
            }
            _ => i += 1, // unrecognized flags are ignored
        }
    }
    opts
}

/// Flags resolved against their defaults: every enabled reader/output/sink
/// has a concrete address, and the "default if nothing else was chosen"
/// rules have been applied.
#[derive(Debug, PartialEq, Eq)]
pub struct ResolvedCli {
    pub local_path: Option<String>,
    pub network_addr: Option<String>,
    pub netcat_addr: Option<String>,
    pub socat_path: Option<String>,
    pub ostream: bool,
    pub text_tree: bool,
    pub influxdb_url: Option<String>,
    pub libpq_conn: Option<String>,
}

impl CliOptions {
    pub fn resolve(self) -> ResolvedCli {
        let netcat_addr = self
            .netcat
            .map(|v| v.unwrap_or_else(|| format!("0.0.0.0:{DEFAULT_TCP_OUTPUT_PORT}")));
        let socat_path = self
            .socat
            .map(|v| v.unwrap_or_else(|| DEFAULT_UNIX_OUTPUT_PATH.to_owned()));
        let no_output_flag = !self.ostream && netcat_addr.is_none() && socat_path.is_none();

        let no_sink_flag = !self.text_tree && self.influxdb.is_none() && self.libpq.is_none();

        ResolvedCli {
            local_path: self
                .local
                .map(|v| v.unwrap_or_else(|| DEFAULT_UNIX_INPUT_PATH.to_owned())),
            network_addr: self
                .network
                .map(|v| v.unwrap_or_else(|| format!("0.0.0.0:{DEFAULT_TCP_INPUT_PORT}"))),
            netcat_addr,
            socat_path,
            ostream: self.ostream || no_output_flag,
            text_tree: self.text_tree || no_sink_flag,
            influxdb_url: self.influxdb.map(|v| v.unwrap_or_else(|| "http://localhost:8086".to_owned())),
            libpq_conn: self.libpq.map(|v| v.unwrap_or_else(|| "".to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_flags_defaults_to_ostream_and_text_tree() {
        let resolved = parse(&args(&[])).resolve();
        assert!(resolved.ostream);
        assert!(resolved.text_tree);
        assert_eq!(resolved.local_path, None);
        assert_eq!(resolved.network_addr, None);
    }

    #[test]
    fn bare_local_flag_uses_default_path() {
        let resolved = parse(&args(&["--local"])).resolve();
        assert_eq!(resolved.local_path.as_deref(), Some(DEFAULT_UNIX_INPUT_PATH));
    }

    #[test]
    fn local_flag_with_value_uses_custom_path() {
        let resolved = parse(&args(&["--local", "/custom/path"])).resolve();
        assert_eq!(resolved.local_path.as_deref(), Some("/custom/path"));
    }

    #[test]
    fn optional_value_does_not_consume_a_following_flag() {
        let resolved = parse(&args(&["--local", "--network"])).resolve();
        assert_eq!(resolved.local_path.as_deref(), Some(DEFAULT_UNIX_INPUT_PATH));
        assert!(resolved.network_addr.is_some());
    }

    #[test]
    fn an_explicit_output_flag_suppresses_the_implicit_stdout_default() {
        let resolved = parse(&args(&["--netcat"])).resolve();
        assert!(!resolved.ostream, "an explicit output flag means no implicit stdout");
        assert!(resolved.netcat_addr.is_some());
    }

    #[test]
    fn explicit_influxdb_suppresses_the_text_tree_default() {
        let resolved = parse(&args(&["--influxdb"])).resolve();
        assert!(!resolved.text_tree);
        assert!(resolved.influxdb_url.is_some());
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let resolved = parse(&args(&["--bogus", "value", "--ostream"])).resolve();
        assert!(resolved.ostream);
    }
}
