//! Configuration Store.
//!
//! Two-level group -> key -> string map, `General`-group fallback
//! implemented by callers (not baked into `get_*`, each accessor takes
//! an explicit group), typed accessors parsed on demand from the string
//! form.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::ini;
use crate::{trace, warn};

pub const GENERAL: &str = "General";

pub const KEY_PAM_SERVICE: &str = "PAMService";
pub const KEY_DEFAULT_USER: &str = "DefaultUser";
pub const KEY_AUTO_LOGIN: &str = "AutoLogin";
pub const KEY_SETUP_TERMINAL: &str = "SetupTerminal";
pub const KEY_SESSION_CMD: &str = "SessionCmd";
pub const KEY_SESSION_PATH: &str = "SessionPath";
pub const KEY_DATA_DIRS: &str = "DataDirs";
pub const KEY_PLUGINS_DIR: &str = "PluginsDir";
pub const KEY_ACCOUNTS_PLUGIN: &str = "AccountsPlugin";

const DEFAULT_SESSION_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const DEFAULT_DATA_DIRS: &str = "/usr/share:/usr/local/share";
const DEFAULT_PLUGINS_DIR: &str = "/usr/lib/logind-core/plugins";

/// Read-only key/value store, group-scoped with an explicit fallback
/// pattern. Values are immutable after `load()` returns except for the
/// defaulting pass `load()` itself performs.
pub struct Config {
    groups: HashMap<String, HashMap<String, String>>,
}

impl Config {
    /// Search order: `$TLM_CONF_FILE` (debug builds only), user config
    /// dir, each system config dir, compile-time sysconfdir. First
    /// existing, readable file wins. No file found is non-fatal.
    pub fn load() -> Config {
        let path = Self::find_config_file();
        let mut groups = HashMap::new();

        if let Some(path) = path {
            trace!("loading config from {}", path.display());
            match fs::read_to_string(&path) {
                Ok(text) => {
                    let parsed = ini::parse(&text, GENERAL);
                    for w in parsed.warnings {
                        warn!("{}:{}: {}", path.display(), w.line, w.message);
                    }
                    groups = parsed.groups;
                }
                Err(e) => warn!("failed to read config file {}: {}", path.display(), e),
            }
        } else {
            trace!("no config file found, starting with defaults");
        }

        let mut config = Config { groups };
        config.load_debug_env();
        config.set_defaults();
        config
    }

    pub fn empty() -> Config {
        Config {
            groups: HashMap::new(),
        }
    }

    fn find_config_file() -> Option<PathBuf> {
        if cfg!(feature = "debug") {
            if let Some(p) = env::var_os("TLM_CONF_FILE") {
                let p = PathBuf::from(p);
                if p.is_file() {
                    return Some(p);
                }
            }
            if let Some(mut dir) = dirs_config_home() {
                dir.push("logind-core/logind-core.conf");
                if dir.is_file() {
                    return Some(dir);
                }
            }
            for dir in system_config_dirs() {
                let mut p = PathBuf::from(dir);
                p.push("logind-core/logind-core.conf");
                if p.is_file() {
                    return Some(p);
                }
            }
            None
        } else {
            let p = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("logind-core.conf");
            if p.is_file() {
                Some(p)
            } else {
                let sysconf = PathBuf::from("/etc/logind-core/logind-core.conf");
                if sysconf.is_file() {
                    Some(sysconf)
                } else {
                    None
                }
            }
        }
    }

    /// `$TLM_PLUGINS_DIR`/`$TLM_ACCOUNT_PLUGIN` override `PluginsDir`/
    /// `AccountsPlugin` when set, mirroring the original debug-build
    /// environment overrides (tlm-config.c's `_load_environment`).
    fn load_debug_env(&mut self) {
        if !cfg!(feature = "debug") {
            return;
        }
        if let Ok(v) = env::var("TLM_PLUGINS_DIR") {
            self.set_string(GENERAL, KEY_PLUGINS_DIR, &v);
        }
        if let Ok(v) = env::var("TLM_ACCOUNT_PLUGIN") {
            self.set_string(GENERAL, KEY_ACCOUNTS_PLUGIN, &v);
        }
    }

    fn set_defaults(&mut self) {
        if self.get_string(GENERAL, KEY_PLUGINS_DIR).is_none() {
            self.set_string(GENERAL, KEY_PLUGINS_DIR, DEFAULT_PLUGINS_DIR);
        }
        if self.get_string(GENERAL, KEY_ACCOUNTS_PLUGIN).is_none() {
            self.set_string(GENERAL, KEY_ACCOUNTS_PLUGIN, "default");
        }
    }

    pub fn get_string(&self, group: &str, key: &str) -> Option<String> {
        self.groups.get(group)?.get(key).cloned()
    }

    /// Looks up `group`, falling back to `General` on miss, the pattern
    /// every caller implements by hand against `get_string`.
    pub fn get_string_fallback(&self, group: &str, key: &str) -> Option<String> {
        self.get_string(group, key)
            .or_else(|| self.get_string(GENERAL, key))
    }

    pub fn get_bool(&self, group: &str, key: &str, default: bool) -> bool {
        match self.get_string(group, key) {
            Some(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    warn!("invalid boolean for {}/{}: {}", group, key, s);
                    default
                }
            },
            None => default,
        }
    }

    /// Best-effort leading-prefix parse, matching `tlm_config_get_int`'s
    /// `atoi`-style tolerance for trailing garbage.
    pub fn get_int(&self, group: &str, key: &str, default: i64) -> i64 {
        match self.get_string(group, key) {
            Some(s) => parse_leading_int(&s).unwrap_or(default),
            None => default,
        }
    }

    /// Leading-prefix parse, matching `tlm_config_get_uint`'s
    /// `sscanf(str, "%u", ...)` tolerance for trailing garbage. Falls
    /// back to `default` only when there's no leading digit at all.
    pub fn get_uint(&self, group: &str, key: &str, default: u64) -> u64 {
        match self.get_string(group, key) {
            Some(s) => parse_leading_uint(&s).unwrap_or(default),
            None => default,
        }
    }

    pub fn set_string(&mut self, group: &str, key: &str, value: &str) {
        self.groups
            .entry(group.to_string())
            .or_insert_with(HashMap::new)
            .insert(key.to_string(), value.to_string());
    }

    pub fn session_path(&self) -> String {
        self.get_string(GENERAL, KEY_SESSION_PATH)
            .unwrap_or_else(|| DEFAULT_SESSION_PATH.to_string())
    }

    pub fn data_dirs(&self) -> String {
        self.get_string(GENERAL, KEY_DATA_DIRS)
            .unwrap_or_else(|| DEFAULT_DATA_DIRS.to_string())
    }
}

fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let mut end = 0;
    let bytes = s.as_bytes();
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    s[..end].parse::<i64>().ok()
}

fn parse_leading_uint(s: &str) -> Option<u64> {
    let s = s.trim();
    let mut end = 0;
    let bytes = s.as_bytes();
    if end < bytes.len() && bytes[end] == b'+' {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    s[digits_start..end].parse::<u64>().ok()
}

fn dirs_config_home() -> Option<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
}

fn system_config_dirs() -> Vec<String> {
    env::var("XDG_CONFIG_DIRS")
        .unwrap_or_else(|_| "/etc/xdg".to_string())
        .split(':')
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_fallback_prefers_specific_group() {
        let mut config = Config::empty();
        config.set_string(GENERAL, "X", "general-value");
        config.set_string("seat0", "X", "seat-value");

        assert_eq!(
            config.get_string_fallback("seat0", "X"),
            Some("seat-value".to_string())
        );
        assert_eq!(
            config.get_string_fallback("seat1", "X"),
            Some("general-value".to_string())
        );
    }

    #[test]
    fn bool_defaults_on_missing_or_invalid() {
        let mut config = Config::empty();
        assert!(config.get_bool(GENERAL, KEY_AUTO_LOGIN, true));
        config.set_string(GENERAL, KEY_AUTO_LOGIN, "nonsense");
        assert!(!config.get_bool(GENERAL, KEY_AUTO_LOGIN, false));
    }

    #[test]
    fn uint_is_leading_prefix_tolerant() {
        let mut config = Config::empty();
        config.set_string(GENERAL, "N", "42abc");
        assert_eq!(config.get_uint(GENERAL, "N", 7), 42);
        config.set_string(GENERAL, "N", "abc");
        assert_eq!(config.get_uint(GENERAL, "N", 7), 7);
        config.set_string(GENERAL, "N", "42");
        assert_eq!(config.get_uint(GENERAL, "N", 7), 42);
    }

    #[test]
    fn int_is_leading_prefix_tolerant() {
        let mut config = Config::empty();
        config.set_string(GENERAL, "N", "42abc");
        assert_eq!(config.get_int(GENERAL, "N", 7), 42);
    }

    #[test]
    fn defaults_applied_when_missing() {
        let config = Config::load();
        assert!(config.get_string(GENERAL, KEY_PLUGINS_DIR).is_some());
        assert_eq!(
            config.get_string(GENERAL, KEY_ACCOUNTS_PLUGIN),
            Some("default".to_string())
        );
    }
}
