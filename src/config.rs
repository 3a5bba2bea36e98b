//! Typed configuration for introspection and binding.
//!
//! Every component receives its own strongly-typed section; nothing is looked
//! up by key at runtime. The file format is TOML, parsed with serde.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::catalog::ConnectionConfig;
use crate::error::ConfigError;
use crate::model::ExecMode;

/// Database engine the catalog and query texts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Postgres,
    Mysql,
    Sqlite,
    Mssql,
    Oracle,
}

impl Engine {
    pub fn to_sqlparser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        use sqlparser::dialect::{
            GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
        };
        match self {
            Engine::Postgres => Box::new(PostgreSqlDialect {}),
            Engine::Mysql => Box::new(MySqlDialect {}),
            Engine::Sqlite => Box::new(SQLiteDialect {}),
            Engine::Mssql => Box::new(MsSqlDialect {}),
            Engine::Oracle => Box::new(GenericDialect {}),
        }
    }

    /// Native bind marker for the 1-based parameter `position`.
    pub fn bind_marker(&self, position: usize) -> String {
        match self {
            Engine::Postgres => format!("${position}"),
            Engine::Mysql | Engine::Sqlite => "?".to_string(),
            Engine::Mssql => format!("@p{position}"),
            Engine::Oracle => format!(":{position}"),
        }
    }

    /// Whether the native marker names its position. Positional `?` markers
    /// bind strictly in text order.
    pub fn numbered_markers(&self) -> bool {
        !matches!(self, Engine::Mysql | Engine::Sqlite)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::Mysql => "mysql",
            Engine::Sqlite => "sqlite",
            Engine::Mssql => "mssql",
            Engine::Oracle => "oracle",
        }
    }
}

/// Foreign-key resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FkMode {
    /// Explicit constraints, then name-based inference.
    #[default]
    Smart,
    /// Explicit constraints referencing a key of the target table; no inference.
    ExplicitOnly,
    /// Catalog-declared constraints exactly as reported; no inference.
    ConstraintOnly,
}

impl FkMode {
    pub fn infers(&self) -> bool {
        matches!(self, FkMode::Smart)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Schema to introspect. Empty means the reader's default schema.
    pub name: String,
    pub fk_mode: FkMode,
    /// Column-name suffix that marks a reference, e.g. `customer_id`.
    pub fk_suffix: String,
    /// Glob patterns; empty means everything not excluded.
    pub include: Vec<String>,
    /// Glob patterns; an exclude match always wins over an include match.
    pub exclude: Vec<String>,
    /// Keep catalog index names instead of generating descriptive ones.
    pub use_index_names: bool,
    /// Default for queries that do not set `allow_nulls` themselves.
    pub allow_nulls: bool,
    /// Upper bound on concurrent per-table catalog calls.
    pub max_concurrency: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            fk_mode: FkMode::default(),
            fk_suffix: String::from("_id"),
            include: Vec::new(),
            exclude: Vec::new(),
            use_index_names: false,
            allow_nulls: false,
            max_concurrency: 8,
        }
    }
}

/// How parameters are written in a query text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// `%%name type%%`, optionally `%%name type,interpolate%%`.
    Delimited {
        #[serde(default = "default_delimiter")]
        delimiter: String,
    },
    /// `?`, one parameter per occurrence.
    Question,
    /// `$1`, `$2`, ...
    Dollar,
    /// `:name`
    Colon,
}

fn default_delimiter() -> String {
    String::from("%%")
}

impl Default for PlaceholderStyle {
    fn default() -> Self {
        PlaceholderStyle::Delimited {
            delimiter: default_delimiter(),
        }
    }
}

/// Per-query binding options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QueryConfig {
    pub name: String,
    /// Inline SQL text.
    pub sql: Option<String>,
    /// File holding the SQL text, relative to the config file.
    pub path: Option<PathBuf>,
    pub type_name: Option<String>,
    pub type_comment: Option<String>,
    pub func_name: Option<String>,
    pub func_comment: Option<String>,
    /// Trim surrounding whitespace from every line and drop blank lines.
    pub trim: bool,
    /// Remove `::<type> AS <name>` decorations, using them as declared types.
    pub strip: bool,
    pub mode: ExecMode,
    /// Downstream hint: return scanned values directly.
    pub flat: bool,
    /// Treat every placeholder as a textual substitution point.
    pub interpolate: bool,
    /// Overrides [`SchemaConfig::allow_nulls`] when set.
    pub allow_nulls: Option<bool>,
    pub placeholders: PlaceholderStyle,
    /// Explicit result fields: `name [type], name [type], ...`.
    pub fields: Option<String>,
}

impl QueryConfig {
    pub fn inline(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: Some(sql.into()),
            ..Default::default()
        }
    }

    /// Resolve the query text, reading `path` relative to `base_dir`.
    pub fn load_text(&self, base_dir: &Path) -> Result<String, ConfigError> {
        if let Some(sql) = &self.sql {
            return Ok(sql.clone());
        }
        let Some(path) = &self.path else {
            return Err(ConfigError::MissingQueryText {
                name: self.name.clone(),
            });
        };
        let full = base_dir.join(path);
        std::fs::read_to_string(&full).map_err(|source| ConfigError::Read {
            path: full.display().to_string(),
            source,
        })
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub engine: Engine,
    pub connection: Option<ConnectionConfig>,
    pub schema: SchemaConfig,
    #[serde(rename = "query")]
    pub queries: Vec<QueryConfig>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("schemabind")
            .join("schemabind.toml")
    }

    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    /// Reject settings that would only fail later, deep inside a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema.fk_suffix.is_empty() {
            return Err(ConfigError::EmptyForeignKeySuffix);
        }
        crate::schema::TableFilter::new(&self.schema.include, &self.schema.exclude)?;
        for query in &self.queries {
            if query.sql.is_none() && query.path.is_none() {
                return Err(ConfigError::MissingQueryText {
                    name: query.name.clone(),
                });
            }
            if let PlaceholderStyle::Delimited { delimiter } = &query.placeholders {
                if delimiter.is_empty() {
                    return Err(ConfigError::EmptyDelimiter);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchemaConfig::default();
        assert_eq!(config.fk_mode, FkMode::Smart);
        assert_eq!(config.fk_suffix, "_id");
        assert!(!config.use_index_names);
        assert!(config.include.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            engine = "postgres"

            [schema]
            name = "public"
            fk_mode = "explicit-only"
            include = ["orders*"]
            exclude = ["orders_archive"]
            use_index_names = true

            [[query]]
            name = "orders_by_customer"
            sql = "SELECT id FROM orders WHERE customer_id = ?"
            strip = true
            mode = "one"
            placeholders = { style = "question" }

            [[query]]
            name = "delete_order"
            path = "delete_order.sql"
            mode = "exec"
        "#;
        let config = Config::from_toml(toml, "inline").unwrap();
        assert_eq!(config.engine, Engine::Postgres);
        assert_eq!(config.schema.fk_mode, FkMode::ExplicitOnly);
        assert_eq!(config.schema.include, vec!["orders*"]);
        assert!(config.schema.use_index_names);
        assert_eq!(config.queries.len(), 2);
        assert_eq!(config.queries[0].mode, ExecMode::One);
        assert_eq!(config.queries[0].placeholders, PlaceholderStyle::Question);
        assert_eq!(
            config.queries[1].placeholders,
            PlaceholderStyle::Delimited {
                delimiter: "%%".into()
            }
        );
        assert_eq!(config.queries[1].mode, ExecMode::Exec);
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let toml = r#"
            [schema]
            include = ["orders[" ]
        "#;
        let err = Config::from_toml(toml, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_query_without_text_rejected() {
        let toml = r#"
            [[query]]
            name = "nothing"
        "#;
        let err = Config::from_toml(toml, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::MissingQueryText { .. }));
    }

    #[test]
    fn test_empty_suffix_rejected() {
        let toml = r#"
            [schema]
            fk_suffix = ""
        "#;
        assert!(matches!(
            Config::from_toml(toml, "inline"),
            Err(ConfigError::EmptyForeignKeySuffix)
        ));
    }

    #[test]
    fn test_bind_markers() {
        assert_eq!(Engine::Postgres.bind_marker(2), "$2");
        assert_eq!(Engine::Mysql.bind_marker(2), "?");
        assert_eq!(Engine::Mssql.bind_marker(2), "@p2");
        assert_eq!(Engine::Oracle.bind_marker(2), ":2");
    }

    #[test]
    fn test_load_text_inline() {
        let q = QueryConfig::inline("q", "SELECT 1");
        assert_eq!(q.load_text(Path::new(".")).unwrap(), "SELECT 1");
    }
}
