//! Free-form extension settings and the `additional.` prefix parser.

use std::collections::BTreeMap;
use std::str::FromStr;

/// Configuration key prefix that marks an extension setting.
pub const EXT_SETTINGS_PREFIX: &str = "additional.";

/// Dialect- or queue-specific key/value overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtSettings {
    settings: BTreeMap<String, String>,
}

impl ExtSettings {
    pub fn builder() -> ExtSettingsBuilder {
        ExtSettingsBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Typed lookup. `None` when the key is absent, `Some(Err(..))` when it does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<Result<T, T::Err>> {
        self.get(key).map(str::parse)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtSettingsBuilder {
    settings: BTreeMap<String, String>,
}

impl ExtSettingsBuilder {
    pub fn with_setting<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> ExtSettings {
        ExtSettings {
            settings: self.settings,
        }
    }
}

/// Extracts [`ExtSettings`] from a flat configuration map.
///
/// Parsing never fails. Entries that cannot be used are described in the caller's
/// error sink and skipped, so the defaults stay in effect.
pub struct ExtSettingsParser<'a, F>
where
    F: Fn() -> ExtSettingsBuilder,
{
    default_settings: F,
    error_messages: &'a mut Vec<String>,
}

impl<'a, F> ExtSettingsParser<'a, F>
where
    F: Fn() -> ExtSettingsBuilder,
{
    pub fn new(default_settings: F, error_messages: &'a mut Vec<String>) -> Self {
        Self {
            default_settings,
            error_messages,
        }
    }

    pub fn parse_ext_settings<'m, I>(&mut self, settings: I) -> ExtSettings
    where
        I: IntoIterator<Item = (&'m String, &'m String)>,
    {
        let mut entries: Vec<(&String, &String)> = settings.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut builder = (self.default_settings)();
        for (key, value) in entries {
            let Some(name) = key.strip_prefix(EXT_SETTINGS_PREFIX) else {
                continue;
            };
            if name.is_empty() {
                self.reject(format!("additional setting '{}' has an empty name", key));
                continue;
            }
            if value.trim().is_empty() {
                self.reject(format!("additional setting '{}' has an empty value", name));
                continue;
            }
            builder = builder.with_setting(name, value.as_str());
        }
        builder.build()
    }

    fn reject(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.error_messages.push(message);
    }
}
