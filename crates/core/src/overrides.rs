//! User-maintained overrides: forced remote matches and ignored games.

use std::{
    collections::{HashMap, HashSet},
    fmt, fs,
    path::Path,
};

use anyhow::{Context, Result};
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer,
};
use tracing::info;

/// Default file name of the override table.
pub const MAPPING_FILE_NAME: &str = "mapping.yaml";

/// Forced remote match for one local identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRule {
    /// Remote identifier the search result must carry.
    pub remote_identity: String,
    /// Title to search for instead of the local one.
    pub title: String,
}

/// Parsed override table.
#[derive(Debug, Clone, Default)]
pub struct OverrideRegistry {
    rules: HashMap<String, OverrideRule>,
    ignored: HashSet<String>,
}

impl OverrideRegistry {
    /// Build a registry from already parsed parts.
    pub fn new(rules: HashMap<String, OverrideRule>, ignored: HashSet<String>) -> Self {
        Self { rules, ignored }
    }

    /// Load the table from `path`. A missing file yields an empty registry.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading overrides from {}", path.display());
        if !path.exists() {
            info!("override file not found, skipping");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let registry = Self::parse(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!(
            "overrides loaded ({} mapped, {} ignored)",
            registry.rules.len(),
            registry.ignored.len()
        );
        Ok(registry)
    }

    /// Parse the YAML document.
    ///
    /// ```yaml
    /// mapping:
    ///   "12345": { remote_identity: "6789", title: "Name on the remote site" }
    /// ignored: ["555"]
    /// ```
    ///
    /// Rules may also sit at the top level next to `ignored`, keyed by local
    /// identity and written with `hltb_id`/`hltb_title`. Any other top-level key
    /// is an error.
    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: MappingFile = serde_yaml::from_str(contents)?;

        let mut rules = HashMap::new();
        for (identity, entry) in file.top_level.into_iter().chain(file.mapping.unwrap_or_default()) {
            rules.insert(
                identity.0,
                OverrideRule {
                    remote_identity: entry.remote_identity.0,
                    title: entry.title.0,
                },
            );
        }
        let ignored = file
            .ignored
            .unwrap_or_default()
            .into_iter()
            .map(|identity| identity.0)
            .collect();

        Ok(Self { rules, ignored })
    }

    /// Forced match for `identity`, if any.
    pub fn rule(&self, identity: &str) -> Option<&OverrideRule> {
        self.rules.get(identity)
    }

    /// Whether `identity` is on the ignore list.
    pub fn is_ignored(&self, identity: &str) -> bool {
        self.ignored.contains(identity)
    }

    /// Number of forced matches.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Ignored identities.
    pub fn ignored(&self) -> &HashSet<String> {
        &self.ignored
    }
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    #[serde(default)]
    mapping: Option<HashMap<Scalar, RuleEntry>>,
    #[serde(default)]
    ignored: Option<Vec<Scalar>>,
    #[serde(flatten)]
    top_level: HashMap<Scalar, RuleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleEntry {
    #[serde(alias = "hltb_id")]
    remote_identity: Scalar,
    #[serde(alias = "hltb_title")]
    title: Scalar,
}

/// Non-empty string or number, kept as trimmed text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Scalar(String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ScalarVisitor;

        impl Visitor<'_> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a non-empty string or a number")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Scalar, E> {
                let value = value.trim();
                if value.is_empty() {
                    return Err(E::custom("empty value"));
                }
                Ok(Scalar(value.to_string()))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Scalar, E> {
                Ok(Scalar(value.to_string()))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Scalar, E> {
                Ok(Scalar(value.to_string()))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_both_sections() -> Result<()> {
        let registry = OverrideRegistry::parse(
            r#"
mapping:
  7:
    remote_identity: 999
    title: "Foo Bar: Remastered"
  "8": { remote_identity: "1000", title: Baz }
ignored:
  - 12
  - "13"
"#,
        )?;

        assert_eq!(
            registry.rule("7"),
            Some(&OverrideRule {
                remote_identity: "999".to_string(),
                title: "Foo Bar: Remastered".to_string(),
            })
        );
        assert_eq!(registry.rule("8").map(|rule| rule.title.as_str()), Some("Baz"));
        assert_eq!(registry.rule_count(), 2);
        assert!(registry.is_ignored("12"));
        assert!(registry.is_ignored("13"));
        assert!(!registry.is_ignored("7"));
        Ok(())
    }

    #[test]
    fn missing_file_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let registry = OverrideRegistry::load(dir.path().join(MAPPING_FILE_NAME))?;
        assert_eq!(registry.rule_count(), 0);
        assert!(registry.ignored().is_empty());
        Ok(())
    }

    #[test]
    fn empty_sections_are_allowed() -> Result<()> {
        let registry = OverrideRegistry::parse("mapping:\nignored:\n")?;
        assert_eq!(registry.rule_count(), 0);
        assert!(OverrideRegistry::parse("")?.ignored().is_empty());
        Ok(())
    }

    #[test]
    fn reads_top_level_rules_with_hltb_keys() -> Result<()> {
        let registry = OverrideRegistry::parse(
            "12345:\n  hltb_id: 6789\n  hltb_title: Foo\nignored: ['555']\n",
        )?;
        assert_eq!(
            registry.rule("12345"),
            Some(&OverrideRule {
                remote_identity: "6789".to_string(),
                title: "Foo".to_string(),
            })
        );
        assert!(registry.is_ignored("555"));
        Ok(())
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        assert!(OverrideRegistry::parse("mappings:\n  \"7\": { title: Foo }\n").is_err());
        assert!(OverrideRegistry::parse("verbose: true\n").is_err());
        assert!(OverrideRegistry::parse("\"7\": { hltb_id: 1, title: Foo, extra: 2 }\n").is_err());
    }

    #[test]
    fn incomplete_rule_is_an_error() {
        let err = OverrideRegistry::parse("mapping:\n  \"7\": { title: Foo }\n").unwrap_err();
        assert!(err.to_string().contains("remote_identity"));
    }
}
