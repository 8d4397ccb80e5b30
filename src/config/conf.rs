//! Typed lookups over INI-style configuration files.
//!
//! `Conf` wraps the parsed sections with "get" methods that work much like a
//! map's `get` (missing section or option yields the default) for several
//! value types. Lookups may be given a fallback chain of sections, which is
//! how sub-section options fall back to their family section and `[brim]`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

/// Lowercase string values that equate to true.
const TRUE_VALUES: &[&str] = &["1", "on", "t", "true", "y", "yes"];

/// Lowercase string values that equate to false.
const FALSE_VALUES: &[&str] = &["0", "f", "false", "n", "no", "off"];

/// Most conf files that may be pulled in through `additional_confs` before
/// the reader assumes recursion.
const MAX_CONF_FILES: usize = 50;

/// Error type for configuration reading and value conversion.
#[derive(Debug, Error)]
pub enum ConfError {
    #[error("could not read conf file {path}: {message}")]
    Read { path: String, message: String },

    #[error("configuration value [{section}] {option} of {value:?} cannot be converted to {kind}")]
    Conversion {
        section: String,
        option: String,
        value: String,
        kind: &'static str,
    },

    #[error("tried to read more than {0} conf files; recursion in [brim] additional_confs?")]
    TooManyFiles(usize),
}

/// A parsed configuration: sections of option/value pairs plus the list of
/// files it was read from.
#[derive(Debug, Clone, Default)]
pub struct Conf {
    store: HashMap<String, HashMap<String, String>>,
    files: Vec<PathBuf>,
}

impl Conf {
    /// Build a `Conf` directly from a section map. Mostly useful in tests.
    pub fn from_store(store: HashMap<String, HashMap<String, String>>) -> Self {
        Self {
            store,
            files: Vec::new(),
        }
    }

    /// The files this configuration was read from, in read order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Iterate over the section names present in the configuration.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.store.keys().map(String::as_str)
    }

    /// Whether a section is present.
    pub fn has_section(&self, section: &str) -> bool {
        self.store.contains_key(section)
    }

    /// Return the raw value of `option` in `section`, if present.
    pub fn get(&self, section: &str, option: &str) -> Option<&str> {
        self.store
            .get(section)
            .and_then(|opts| opts.get(option))
            .map(String::as_str)
    }

    /// Return the first value of `option` found walking the given section
    /// chain. This is how `[wsgi#alt] port` falls back to `[wsgi] port` and
    /// then `[brim] port`.
    pub fn get_in(&self, sections: &[&str], option: &str) -> Option<&str> {
        sections.iter().find_map(|s| self.get(s, option))
    }

    /// String value with a default.
    pub fn get_str(&self, sections: &[&str], option: &str, default: &str) -> String {
        self.get_in(sections, option)
            .unwrap_or(default)
            .to_string()
    }

    /// Integer value with a default.
    pub fn get_int(
        &self,
        sections: &[&str],
        option: &str,
        default: i64,
    ) -> Result<i64, ConfError> {
        match self.get_in(sections, option) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfError::Conversion {
                section: sections.join("|"),
                option: option.to_string(),
                value: value.to_string(),
                kind: "int",
            }),
        }
    }

    /// Float value with a default.
    pub fn get_float(
        &self,
        sections: &[&str],
        option: &str,
        default: f64,
    ) -> Result<f64, ConfError> {
        match self.get_in(sections, option) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfError::Conversion {
                section: sections.join("|"),
                option: option.to_string(),
                value: value.to_string(),
                kind: "float",
            }),
        }
    }

    /// Boolean value with a default. Accepts the usual spellings (`yes`,
    /// `true`, `on`, `1`, and their negations).
    pub fn get_bool(
        &self,
        sections: &[&str],
        option: &str,
        default: bool,
    ) -> Result<bool, ConfError> {
        match self.get_in(sections, option) {
            None => Ok(default),
            Some(value) => {
                let lower = value.trim().to_ascii_lowercase();
                if TRUE_VALUES.contains(&lower.as_str()) {
                    Ok(true)
                } else if FALSE_VALUES.contains(&lower.as_str()) {
                    Ok(false)
                } else {
                    Err(ConfError::Conversion {
                        section: sections.join("|"),
                        option: option.to_string(),
                        value: value.to_string(),
                        kind: "boolean",
                    })
                }
            }
        }
    }

    /// Path value, expanding a leading `~/` to the user's home directory.
    pub fn get_path(&self, sections: &[&str], option: &str) -> Option<PathBuf> {
        self.get_in(sections, option).map(expand_user)
    }
}

fn expand_user(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(value)
}

/// Read one or more conf files into a [`Conf`].
///
/// Files later in the list override values from earlier files. A
/// `[brim] additional_confs` value names further files to pull in, which lets
/// one conf file include shared settings from another.
pub fn read_conf<P: AsRef<Path>>(paths: &[P]) -> Result<Conf, ConfError> {
    let mut conf = Conf::default();
    for path in paths {
        read_one(&mut conf, path.as_ref())?;
    }
    Ok(conf)
}

fn read_one(conf: &mut Conf, path: &Path) -> Result<(), ConfError> {
    if conf.files.len() >= MAX_CONF_FILES {
        return Err(ConfError::TooManyFiles(MAX_CONF_FILES));
    }
    let path = expand_user(&path.to_string_lossy());
    // A missing file is treated the same as an unreadable one elsewhere in
    // the launcher: the caller decides whether zero files read is fatal.
    if !path.exists() {
        return Ok(());
    }
    let ini = Ini::load_from_file(&path).map_err(|err| ConfError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    for (section, props) in ini.iter() {
        let Some(section) = section else { continue };
        let entry = conf.store.entry(section.to_string()).or_default();
        for (option, value) in props.iter() {
            entry.insert(option.to_string(), value.to_string());
        }
    }
    conf.files.push(path.clone());

    let additional = conf
        .store
        .get_mut("brim")
        .and_then(|opts| opts.remove("additional_confs"));
    if let Some(additional) = additional {
        for extra in additional.split_whitespace() {
            read_one(conf, Path::new(extra))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn conf_from(sections: &[(&str, &[(&str, &str)])]) -> Conf {
        let mut store = HashMap::new();
        for (name, opts) in sections {
            let mut map = HashMap::new();
            for (k, v) in *opts {
                map.insert(k.to_string(), v.to_string());
            }
            store.insert(name.to_string(), map);
        }
        Conf::from_store(store)
    }

    #[test]
    fn test_fallback_chain_order() {
        let conf = conf_from(&[
            ("brim", &[("port", "80"), ("ip", "127.0.0.1")]),
            ("wsgi", &[("port", "8080")]),
            ("wsgi#alt", &[("workers", "4")]),
        ]);
        let chain = ["wsgi#alt", "wsgi", "brim"];
        assert_eq!(conf.get_in(&chain, "port"), Some("8080"));
        assert_eq!(conf.get_in(&chain, "ip"), Some("127.0.0.1"));
        assert_eq!(conf.get_in(&chain, "workers"), Some("4"));
        assert_eq!(conf.get_in(&chain, "backlog"), None);
    }

    #[test]
    fn test_get_int_default_and_error() {
        let conf = conf_from(&[("wsgi", &[("workers", "two")])]);
        assert_eq!(conf.get_int(&["tcp"], "workers", 1).unwrap(), 1);
        let err = conf.get_int(&["wsgi"], "workers", 1).unwrap_err();
        assert!(err.to_string().contains("cannot be converted to int"));
    }

    #[test]
    fn test_get_bool_spellings() {
        let conf = conf_from(&[(
            "wsgi",
            &[("a", "Yes"), ("b", "off"), ("c", "1"), ("d", "maybe")],
        )]);
        assert!(conf.get_bool(&["wsgi"], "a", false).unwrap());
        assert!(!conf.get_bool(&["wsgi"], "b", true).unwrap());
        assert!(conf.get_bool(&["wsgi"], "c", false).unwrap());
        assert!(conf.get_bool(&["wsgi"], "missing", true).unwrap());
        assert!(conf.get_bool(&["wsgi"], "d", false).is_err());
    }

    #[test]
    fn test_read_conf_merges_later_files_over_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.conf");
        let second = dir.path().join("second.conf");
        std::fs::write(&first, "[wsgi]\nport = 8901\nworkers = 2\n").unwrap();
        std::fs::write(&second, "[wsgi]\nport = 8902\n").unwrap();

        let conf = read_conf(&[&first, &second]).unwrap();
        assert_eq!(conf.get("wsgi", "port"), Some("8902"));
        assert_eq!(conf.get("wsgi", "workers"), Some("2"));
        assert_eq!(conf.files().len(), 2);
    }

    #[test]
    fn test_additional_confs_pulled_in() {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("extra.conf");
        std::fs::write(&extra, "[tcp]\nport = 9000\n").unwrap();
        let main = dir.path().join("main.conf");
        let mut f = std::fs::File::create(&main).unwrap();
        writeln!(f, "[brim]").unwrap();
        writeln!(f, "additional_confs = {}", extra.display()).unwrap();
        drop(f);

        let conf = read_conf(&[&main]).unwrap();
        assert_eq!(conf.get("tcp", "port"), Some("9000"));
        // The include directive itself is consumed, not kept as an option.
        assert_eq!(conf.get("brim", "additional_confs"), None);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let conf = read_conf(&[Path::new("/nonexistent/brimd.conf")]).unwrap();
        assert!(conf.files().is_empty());
    }
}
