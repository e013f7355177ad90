//! Configuration model and loader.
//!
//! The on-disk format is TOML, loaded with `serde`. Table and
//! field rules are modeled as `Vec`s rather than maps so that declaration
//! order survives into the runtime tree: regex-precedence and "unused rule"
//! warnings both depend on it (see `ConfigRoot::find_table`).

use std::cell::Cell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

/// Longest hash/substring length accepted from config (`length <= 32`).
pub const MAX_HASH_LEN: u16 = 32;
/// Longest secret accepted from config.
pub const MAX_SECRET_LEN: usize = 1024;

/// One anonymization transform and its parameters.
///
/// Modeled as a tagged `enum` rather than one flat struct with many optional
/// fields: each case's parameters are known at config-parse time, and an
/// invalid combination (e.g. a `Key` case carrying a `domain`) is simply not
/// representable.
///
/// `Script` only exists in the type when built with the `scripting`
/// feature; without it, `serde` itself rejects a `type = "script"` field
/// rule at load time with an "unknown variant" error, so no separate
/// feature-gate check is needed here.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnonType {
    FixedNull,
    Fixed { value: String },
    FixedQuoted { value: String },
    FixedUnquoted { value: String },
    TextHash { length: u16 },
    EmailHash { length: u16, domain: String },
    IntHash { length: u16 },
    Key,
    AppendKey { value: String },
    PrependKey { value: String },
    AppendIndex { value: String },
    PrependIndex { value: String },
    Substring { length: u16 },
    Json {
        #[serde(default)]
        json_paths: Vec<JsonPathSpec>,
    },
    #[cfg(feature = "scripting")]
    Script { function: String },
}

impl AnonType {
    /// True if this case (or, for `Json`, any of its nested path specs)
    /// derives its output from the HMAC secret.
    pub fn uses_secret(&self) -> bool {
        match self {
            AnonType::TextHash { .. } | AnonType::EmailHash { .. } | AnonType::IntHash { .. } => {
                true
            }
            AnonType::Json { json_paths } => json_paths.iter().any(|p| p.spec.uses_secret()),
            _ => false,
        }
    }

    /// The `length` parameter this case declares, if any.
    fn declared_length(&self) -> Option<u16> {
        match self {
            AnonType::TextHash { length }
            | AnonType::EmailHash { length, .. }
            | AnonType::IntHash { length }
            | AnonType::Substring { length } => Some(*length),
            _ => None,
        }
    }

    /// The `value` (fixed value) parameter this case declares, if any.
    fn declared_value(&self) -> Option<&str> {
        match self {
            AnonType::Fixed { value }
            | AnonType::FixedQuoted { value }
            | AnonType::FixedUnquoted { value }
            | AnonType::AppendKey { value }
            | AnonType::PrependKey { value }
            | AnonType::AppendIndex { value }
            | AnonType::PrependIndex { value } => Some(value.as_str()),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            AnonType::FixedNull => "fixed_null",
            AnonType::Fixed { .. } => "fixed",
            AnonType::FixedQuoted { .. } => "fixed_quoted",
            AnonType::FixedUnquoted { .. } => "fixed_unquoted",
            AnonType::TextHash { .. } => "text_hash",
            AnonType::EmailHash { .. } => "email_hash",
            AnonType::IntHash { .. } => "int_hash",
            AnonType::Key => "key",
            AnonType::AppendKey { .. } => "append_key",
            AnonType::PrependKey { .. } => "prepend_key",
            AnonType::AppendIndex { .. } => "append_index",
            AnonType::PrependIndex { .. } => "prepend_index",
            AnonType::Substring { .. } => "substring",
            AnonType::Json { .. } => "json",
            #[cfg(feature = "scripting")]
            AnonType::Script { .. } => "script",
        }
    }

    /// Validate this case's own invariants, pushing human-readable problems
    /// (prefixed by `where_`, e.g. `"table users, field email"`) onto `errors`.
    fn validate(&self, where_: &str, errors: &mut Vec<String>) {
        if let Some(length) = self.declared_length() {
            if length > MAX_HASH_LEN {
                errors.push(format!(
                    "{where_}: {} length {} exceeds maximum of {}",
                    self.type_name(),
                    length,
                    MAX_HASH_LEN
                ));
            }
        }
        if matches!(self, AnonType::EmailHash { domain, .. } if domain.is_empty()) {
            errors.push(format!("{where_}: email_hash requires a non-empty domain"));
        }
        let needs_value = matches!(
            self,
            AnonType::Fixed { .. }
                | AnonType::FixedQuoted { .. }
                | AnonType::FixedUnquoted { .. }
                | AnonType::AppendKey { .. }
                | AnonType::PrependKey { .. }
                | AnonType::AppendIndex { .. }
                | AnonType::PrependIndex { .. }
        );
        if needs_value && self.declared_value().map(str::is_empty).unwrap_or(true) {
            errors.push(format!(
                "{where_}: {} requires a non-empty value",
                self.type_name()
            ));
        }
        if let AnonType::Json { json_paths } = self {
            let mut seen = HashSet::new();
            for p in json_paths {
                if !seen.insert(p.path.as_str()) {
                    errors.push(format!("{where_}: duplicate json path '{}'", p.path));
                }
                p.spec
                    .validate(&format!("{where_}, json path '{}'", p.path), errors);
            }
        }
    }
}

/// A single path-addressed transform inside a JSON document column.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonPathSpec {
    /// Dotted path from the document root; numeric segments index arrays.
    pub path: String,
    #[serde(flatten)]
    pub spec: AnonType,
    /// Number of times this path has been resolved and rewritten.
    #[serde(skip)]
    pub hits: Cell<u64>,
}

/// What to do with a table's rows.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableAction {
    #[default]
    Anonymize,
    Truncate,
}

/// One column's rule, as written in the config file (before DDL backfill).
#[derive(Debug, Clone, Deserialize)]
pub struct FieldRuleConfig {
    pub name: String,
    #[serde(flatten)]
    pub spec: AnonType,
    /// Reserved for future multi-value columns; parsed and validated but no
    /// `AnonType` case currently consumes it (matches the upstream tool).
    pub separator: Option<char>,
}

/// A field rule after DDL backfill: position and quoting are now known.
#[derive(Debug)]
pub struct FieldRule {
    pub name: String,
    pub spec: AnonType,
    pub separator: Option<char>,
    pub position: Cell<Option<usize>>,
    pub quoted_in_schema: Cell<bool>,
    pub hits: Cell<u64>,
}

impl FieldRule {
    fn from_config(cfg: FieldRuleConfig) -> Self {
        FieldRule {
            name: cfg.name,
            spec: cfg.spec,
            separator: cfg.separator,
            position: Cell::new(None),
            quoted_in_schema: Cell::new(false),
            hits: Cell::new(0),
        }
    }
}

/// One table's rule, as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TableRuleConfig {
    pub key: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub action: TableAction,
    #[serde(default)]
    pub fields: Vec<FieldRuleConfig>,
}

/// A table rule after compilation: regex (if any) is compiled once.
#[derive(Debug)]
pub struct TableRule {
    pub key: String,
    pub is_regex: bool,
    pub compiled_regex: Option<Regex>,
    pub action: TableAction,
    pub fields: Vec<FieldRule>,
}

impl TableRule {
    /// Does this rule apply to table `name`?
    pub fn matches(&self, name: &str) -> bool {
        if self.is_regex {
            self.compiled_regex
                .as_ref()
                .expect("regex table rule always carries a compiled pattern")
                .is_match(name)
        } else {
            self.key == name
        }
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_position(&self, pos: usize) -> Option<&FieldRule> {
        self.fields.iter().find(|f| f.position.get() == Some(pos))
    }
}

/// The raw shape of the TOML document, deserialized directly.
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    secret: String,
    #[serde(default)]
    stats: bool,
    script_dir: Option<String>,
    script_module: Option<String>,
    #[serde(default)]
    tables: Vec<TableRuleConfig>,
}

/// The fully-validated, compiled configuration tree the engine and rewriter
/// consume. Read-only for the rest of the pipeline's lifetime except for the
/// per-rule `Cell` hit counters and DDL-backfilled `position`/`quoted_in_schema`.
#[derive(Debug)]
pub struct ConfigRoot {
    pub secret: Vec<u8>,
    pub stats: bool,
    pub script_dir: Option<PathBuf>,
    pub script_module: Option<String>,
    pub tables: Vec<TableRule>,
}

impl ConfigRoot {
    /// Load and validate a configuration file. `path` must exist; there is
    /// no "fall back to a default file" mode — `-f` is mandatory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Configuration file not found: {}", path.display());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;
        Self::from_file(file, path)
    }

    fn from_file(file: ConfigFile, path: &Path) -> Result<Self> {
        let mut errors = Vec::new();

        if file.secret.len() > MAX_SECRET_LEN {
            errors.push(format!(
                "secret length {} exceeds maximum of {}",
                file.secret.len(),
                MAX_SECRET_LEN
            ));
        }

        let mut tables = Vec::with_capacity(file.tables.len());
        let mut any_secret_user = false;

        for table_cfg in file.tables {
            let where_table = format!("table {}", table_cfg.key);

            // Anchored implicitly: a table regex matches the whole
            // identifier, not an arbitrary substring of it.
            let compiled_regex = if table_cfg.regex {
                match Regex::new(&format!("^(?:{})$", table_cfg.key)) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        errors.push(format!("{where_table}: invalid regex: {e}"));
                        None
                    }
                }
            } else {
                None
            };

            let mut seen_fields = HashSet::new();
            let mut fields = Vec::with_capacity(table_cfg.fields.len());
            for field_cfg in table_cfg.fields {
                let where_field = format!("{where_table}, field {}", field_cfg.name);
                if !seen_fields.insert(field_cfg.name.clone()) {
                    errors.push(format!("{where_field}: duplicate field rule"));
                }
                if field_cfg.spec.uses_secret() {
                    any_secret_user = true;
                }
                field_cfg.spec.validate(&where_field, &mut errors);
                fields.push(FieldRule::from_config(field_cfg));
            }

            tables.push(TableRule {
                key: table_cfg.key,
                is_regex: table_cfg.regex,
                compiled_regex,
                action: table_cfg.action,
                fields,
            });
        }

        if any_secret_user && file.secret.is_empty() {
            errors.push(
                "secret must be non-empty: at least one *_hash rule is configured".to_string(),
            );
        }

        if !errors.is_empty() {
            bail!(
                "Invalid configuration {}:\n  - {}",
                path.display(),
                errors.join("\n  - ")
            );
        }

        Ok(ConfigRoot {
            secret: file.secret.into_bytes(),
            stats: file.stats,
            script_dir: file.script_dir.map(PathBuf::from),
            script_module: file.script_module,
            tables,
        })
    }

    /// Find the rule that applies to `name`. A literal key match always wins
    /// over a regex match, regardless of declaration order; among regex
    /// rules, the first declared match wins.
    pub fn find_table(&self, name: &str) -> Option<&TableRule> {
        self.tables
            .iter()
            .find(|t| !t.is_regex && t.key == name)
            .or_else(|| self.tables.iter().find(|t| t.is_regex && t.matches(name)))
    }
}
