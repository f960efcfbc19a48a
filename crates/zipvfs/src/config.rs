//! Filesystem configuration.

use crate::error::{Error, Result};
use crate::zip::CompressionMethod;

/// Default number of idle inflaters and deflaters kept for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 20;

/// Options consumed when a [`ZipFileSystem`](crate::ZipFileSystem) is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Create an empty archive if the path does not exist.
    pub create_if_missing: bool,
    /// Buffer written entries in staging files next to the archive instead of memory.
    pub use_staging_files: bool,
    /// Answer directory queries from a synthesized tree instead of scanning the index.
    pub build_directory_tree: bool,
    /// Charset label for entry names. `UTF-8` marks new entries with the UTF-8 flag;
    /// any other label leaves names as opaque bytes.
    pub name_encoding: String,
    /// Directory that relative paths resolve against. Must start with `/`.
    pub default_working_directory: String,
    /// Compression method for new file entries.
    pub default_method: CompressionMethod,
    /// Always write the ZIP64 END record and locator.
    pub force_zip64_end: bool,
    /// Read access and creation times from the local header's extended timestamp.
    pub read_local_times: bool,
    /// Idle inflater/deflater pool capacity.
    pub pool_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            use_staging_files: false,
            build_directory_tree: true,
            name_encoding: "UTF-8".to_string(),
            default_working_directory: "/".to_string(),
            default_method: CompressionMethod::Deflate,
            force_zip64_end: false,
            read_local_times: true,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl Config {
    /// Build a configuration from string key/value options.
    ///
    /// Recognized keys: `create`, `useTempFile`, `buildDirectoryTree`,
    /// `encoding`, `defaultDirectory`, `noCompression`, `forceZIP64End`,
    /// `zipinfo-time` and `poolCapacity`. Unknown keys are ignored.
    pub fn from_options<I, K, V>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "create" => config.create_if_missing = parse_bool(key, value)?,
                "useTempFile" => config.use_staging_files = parse_bool(key, value)?,
                "buildDirectoryTree" => config.build_directory_tree = parse_bool(key, value)?,
                "encoding" => config.name_encoding = value.to_string(),
                "defaultDirectory" => config.default_working_directory = value.to_string(),
                "noCompression" => {
                    config.default_method = if parse_bool(key, value)? {
                        CompressionMethod::Store
                    } else {
                        CompressionMethod::Deflate
                    }
                }
                "forceZIP64End" => config.force_zip64_end = parse_bool(key, value)?,
                "zipinfo-time" => config.read_local_times = parse_bool(key, value)?,
                "poolCapacity" => {
                    config.pool_capacity = value.parse().map_err(|_| {
                        Error::InvalidConfig(format!("poolCapacity: expected a number, got {value:?}"))
                    })?
                }
                other => log::debug!("ignoring unknown option {other:?}"),
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if !self.default_working_directory.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "default directory must be absolute: {:?}",
                self.default_working_directory
            )));
        }
        if self.name_encoding.is_empty() {
            return Err(Error::InvalidConfig("empty name encoding".to_string()));
        }
        Ok(())
    }

    /// Whether names are UTF-8.
    pub fn is_utf8(&self) -> bool {
        let label = self.name_encoding.to_ascii_lowercase();
        label == "utf-8" || label == "utf8"
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::InvalidConfig(format!(
            "{key}: expected true or false, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.build_directory_tree);
        assert!(config.read_local_times);
        assert!(config.is_utf8());
        assert_eq!(config.default_method, CompressionMethod::Deflate);
        assert_eq!(config.pool_capacity, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_options() {
        let config = Config::from_options([
            ("create", "true"),
            ("noCompression", "true"),
            ("forceZIP64End", "true"),
            ("zipinfo-time", "false"),
            ("encoding", "Cp437"),
            ("poolCapacity", "4"),
            ("somethingElse", "whatever"),
        ])
        .unwrap();
        assert!(config.create_if_missing);
        assert_eq!(config.default_method, CompressionMethod::Store);
        assert!(config.force_zip64_end);
        assert!(!config.read_local_times);
        assert!(!config.is_utf8());
        assert_eq!(config.pool_capacity, 4);
    }

    #[test]
    fn test_malformed_values() {
        assert!(matches!(
            Config::from_options([("create", "yes")]),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_options([("poolCapacity", "-1")]),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_options([("defaultDirectory", "relative")]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"create_if_missing": true, "default_method": "Store", "pool_capacity": 2}"#,
        )
        .unwrap();
        assert!(config.create_if_missing);
        assert_eq!(config.default_method, CompressionMethod::Store);
        assert_eq!(config.pool_capacity, 2);
        assert_eq!(config.default_working_directory, "/");
    }
}
