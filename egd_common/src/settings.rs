//! Flat name/value settings store for driver options.
//!
//! All names and values live back to back, NUL-terminated, in one byte
//! buffer; the index only records offsets into it. Adding a name again
//! shadows the earlier entry (lookups scan newest first) and the old bytes
//! stay in the buffer until [`Settings::reset`] or [`Settings::free`].
//!
//! Both allocations grow in fixed increments
//! ([`SETTINGS_BUFFER_INCREMENT`] bytes, [`SETTINGS_ENTRIES_INCREMENT`]
//! entries). A failed growth leaves the store exactly as it was.

use crate::consts::{SETTINGS_BUFFER_INCREMENT, SETTINGS_ENTRIES_INCREMENT};
use crate::error::DeviceError;
use thiserror::Error;

/// Error type for settings operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// Buffer or index could not grow.
    #[error("settings allocation failed")]
    OutOfMemory,

    /// Name or value contains a NUL byte.
    #[error("setting text contains NUL byte")]
    InteriorNul,

    /// Option string has a name without a value.
    #[error("option '{0}' has no value")]
    MissingValue(String),
}

impl From<SettingsError> for DeviceError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::OutOfMemory => DeviceError::OutOfMemory,
            other => DeviceError::invalid(other.to_string()),
        }
    }
}

/// Offsets of one entry inside the text buffer.
#[derive(Debug, Clone, Copy)]
struct SettingEntry {
    name_offset: usize,
    value_offset: usize,
}

/// Append-only name/value table with override-by-last-write semantics.
#[derive(Debug, Default)]
pub struct Settings {
    entries: Vec<SettingEntry>,
    buffer: Vec<u8>,
}

impl Settings {
    /// Create an empty store. Nothing is allocated until the first insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a `name|value|name|value` option string.
    pub fn parse_options(options: &str) -> Result<Self, SettingsError> {
        let mut settings = Self::new();
        settings.add_options(options)?;
        Ok(settings)
    }

    /// Add every pair of a `name|value|name|value` option string.
    ///
    /// Empty strings add nothing. On error the pairs already added stay.
    pub fn add_options(&mut self, options: &str) -> Result<(), SettingsError> {
        if options.is_empty() {
            return Ok(());
        }

        let mut fields = options.split('|');
        while let Some(name) = fields.next() {
            let value = fields
                .next()
                .ok_or_else(|| SettingsError::MissingValue(name.to_string()))?;
            self.add(name, value)?;
        }
        Ok(())
    }

    /// Add a setting. A later setting with the same name wins.
    pub fn add(&mut self, name: &str, value: &str) -> Result<(), SettingsError> {
        if name.contains('\0') || value.contains('\0') {
            return Err(SettingsError::InteriorNul);
        }

        let nlen = name.len() + 1;
        let vlen = value.len() + 1;

        // Grow the text buffer in whole increments until the strings fit
        let needed = self.buffer.len() + nlen + vlen;
        if needed > self.buffer.capacity() {
            let increments = (needed - self.buffer.capacity()).div_ceil(SETTINGS_BUFFER_INCREMENT);
            let target = self.buffer.capacity() + increments * SETTINGS_BUFFER_INCREMENT;
            self.buffer
                .try_reserve_exact(target - self.buffer.len())
                .map_err(|_| SettingsError::OutOfMemory)?;
        }

        // Grow the index by a fixed number of entries
        if self.entries.len() == self.entries.capacity() {
            self.entries
                .try_reserve_exact(SETTINGS_ENTRIES_INCREMENT)
                .map_err(|_| SettingsError::OutOfMemory)?;
        }

        let name_offset = self.buffer.len();
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.push(0);
        let value_offset = self.buffer.len();
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.push(0);

        self.entries.push(SettingEntry {
            name_offset,
            value_offset,
        });
        Ok(())
    }

    /// Value of the most recently added setting called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|entry| self.text_at(entry.name_offset) == name)
            .map(|entry| self.text_at(entry.value_offset))
    }

    /// Parse the value of `name`, or return `default` when it is absent.
    pub fn get_parsed<T: std::str::FromStr>(
        &self,
        name: &str,
        default: T,
    ) -> Result<T, DeviceError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| DeviceError::invalid(format!("bad value for '{name}': {raw}"))),
        }
    }

    /// Number of entries, shadowed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Logically empty the store, keeping both allocations.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.buffer.clear();
    }

    /// Empty the store and release both allocations.
    pub fn free(&mut self) {
        self.entries = Vec::new();
        self.buffer = Vec::new();
    }

    /// Allocated size of the text buffer in bytes.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Allocated size of the index in entries.
    pub fn entries_capacity(&self) -> usize {
        self.entries.capacity()
    }

    fn text_at(&self, offset: usize) -> &str {
        let tail = &self.buffer[offset..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        // Only whole `&str`s are ever copied in, so every run is valid UTF-8.
        std::str::from_utf8(&tail[..end]).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing() {
        let settings = Settings::new();
        assert!(settings.get("numch").is_none());
        assert!(settings.is_empty());
    }

    #[test]
    fn test_latest_definition_wins() {
        let mut settings = Settings::new();
        settings.add("fs", "512").unwrap();
        settings.add("numch", "64").unwrap();
        settings.add("fs", "2048").unwrap();

        assert_eq!(settings.get("fs"), Some("2048"));
        assert_eq!(settings.get("numch"), Some("64"));
        assert_eq!(settings.len(), 3);
    }

    #[test]
    fn test_growth_in_increments() {
        let mut settings = Settings::new();
        settings.add("a", "b").unwrap();
        assert_eq!(settings.buffer_capacity(), SETTINGS_BUFFER_INCREMENT);
        assert_eq!(settings.entries_capacity(), SETTINGS_ENTRIES_INCREMENT);

        let long = "v".repeat(SETTINGS_BUFFER_INCREMENT * 2);
        settings.add("long", &long).unwrap();
        assert_eq!(settings.buffer_capacity() % SETTINGS_BUFFER_INCREMENT, 0);
        assert_eq!(settings.get("long"), Some(long.as_str()));
    }

    #[test]
    fn test_index_grows_past_one_chunk() {
        let mut settings = Settings::new();
        for i in 0..(SETTINGS_ENTRIES_INCREMENT + 1) {
            settings.add(&format!("k{i}"), &i.to_string()).unwrap();
        }
        assert_eq!(settings.entries_capacity(), 2 * SETTINGS_ENTRIES_INCREMENT);
        assert_eq!(settings.get("k0"), Some("0"));
        assert_eq!(settings.get("k32"), Some("32"));
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut settings = Settings::new();
        settings.add("trigger", "255").unwrap();
        let buffer_cap = settings.buffer_capacity();
        let entries_cap = settings.entries_capacity();

        settings.reset();
        assert!(settings.get("trigger").is_none());
        assert_eq!(settings.buffer_capacity(), buffer_cap);

        settings.add("trigger", "1").unwrap();
        assert_eq!(settings.buffer_capacity(), buffer_cap);
        assert_eq!(settings.entries_capacity(), entries_cap);
        assert_eq!(settings.get("trigger"), Some("1"));
    }

    #[test]
    fn test_free_releases_allocations() {
        let mut settings = Settings::new();
        settings.add("a", "b").unwrap();
        settings.free();
        assert_eq!(settings.buffer_capacity(), 0);
        assert_eq!(settings.entries_capacity(), 0);
        assert!(settings.get("a").is_none());
    }

    #[test]
    fn test_interior_nul_rejected_without_side_effect() {
        let mut settings = Settings::new();
        settings.add("ok", "1").unwrap();
        assert_eq!(settings.add("bad\0name", "x"), Err(SettingsError::InteriorNul));
        assert_eq!(settings.len(), 1);
    }

    #[test]
    fn test_empty_value_is_a_value() {
        let mut settings = Settings::new();
        settings.add("label", "").unwrap();
        assert_eq!(settings.get("label"), Some(""));
    }

    #[test]
    fn test_parse_options() {
        let settings = Settings::parse_options("fs|1024|trigger|7|fs|256").unwrap();
        assert_eq!(settings.get("fs"), Some("256"));
        assert_eq!(settings.get("trigger"), Some("7"));

        let err = Settings::parse_options("fs|1024|dangling").unwrap_err();
        assert_eq!(err, SettingsError::MissingValue("dangling".into()));

        assert!(Settings::parse_options("").unwrap().is_empty());
    }

    #[test]
    fn test_get_parsed() {
        let settings = Settings::parse_options("fs|1024|bad|x").unwrap();
        assert_eq!(settings.get_parsed("fs", 2048u32).unwrap(), 1024);
        assert_eq!(settings.get_parsed("missing", 2048u32).unwrap(), 2048);
        assert!(settings.get_parsed("bad", 0u32).is_err());
    }
}
