use serde::{Deserialize, Deserializer, Serialize};

use crate::model::TableKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRaw {
    #[serde(alias = "TABLE_NAME", alias = "table_name", alias = "tbl_name", alias = "relname")]
    pub name: String,
    #[serde(
        default,
        alias = "TABLE_TYPE",
        alias = "table_type",
        alias = "type",
        deserialize_with = "table_kind"
    )]
    pub kind: TableKind,
}

impl TableRaw {
    pub fn new(name: impl Into<String>, kind: TableKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl TableKind {
    /// Map an engine's table-type spelling to a kind.
    ///
    /// Covers `information_schema` (`BASE TABLE`, `VIEW`), `pg_class.relkind`
    /// codes and `sqlite_master.type`. Unknown spellings are plain tables.
    pub fn from_catalog(value: &str) -> TableKind {
        match value.trim().to_lowercase().as_str() {
            "v" | "view" | "system view" => TableKind::View,
            "m" | "materialized_view" | "materialized view" | "mview" => {
                TableKind::MaterializedView
            }
            "f" | "foreign_table" | "foreign table" | "foreign" => TableKind::ForeignTable,
            _ => TableKind::Table,
        }
    }
}

fn table_kind<'de, D>(deserializer: D) -> Result<TableKind, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(TableKind::from_catalog(&s))
}

/// Booleans as catalogs spell them: `true`, `1`, `"YES"`, `"t"`, ...
#[derive(Deserialize)]
#[serde(untagged)]
enum FlexBool {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FlexBool {
    fn into_bool<E: serde::de::Error>(self) -> Result<bool, E> {
        match self {
            FlexBool::Bool(b) => Ok(b),
            FlexBool::Int(i) => Ok(i != 0),
            FlexBool::Text(s) => match s.trim().to_lowercase().as_str() {
                "yes" | "y" | "true" | "t" | "1" => Ok(true),
                "no" | "n" | "false" | "f" | "0" | "" => Ok(false),
                other => Err(E::custom(format!("not a boolean: {other:?}"))),
            },
        }
    }
}

fn flex_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    FlexBool::deserialize(deserializer)?.into_bool()
}

fn flex_bool_opt<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<FlexBool>::deserialize(deserializer)?
        .map(FlexBool::into_bool)
        .transpose()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRaw {
    /// Owning table, when the engine reports it on the column row.
    #[serde(default, alias = "TABLE_NAME", alias = "table_name")]
    pub table: Option<String>,
    #[serde(alias = "COLUMN_NAME", alias = "column_name", alias = "attname")]
    pub name: String,
    #[serde(alias = "DATA_TYPE", alias = "type", alias = "udt_name")]
    pub data_type: String,
    #[serde(
        default,
        alias = "IS_NULLABLE",
        alias = "is_nullable",
        deserialize_with = "flex_bool_opt"
    )]
    pub nullable: Option<bool>,
    /// Inverted nullability flag (SQLite `notnull`, Postgres `attnotnull`).
    #[serde(
        default,
        alias = "notnull",
        alias = "attnotnull",
        deserialize_with = "flex_bool_opt"
    )]
    pub not_null: Option<bool>,
    #[serde(
        alias = "ORDINAL_POSITION",
        alias = "ordinal_position",
        alias = "cid",
        alias = "attnum",
        alias = "column_id"
    )]
    pub ordinal: i32,
    #[serde(
        default,
        alias = "COLUMN_DEFAULT",
        alias = "column_default",
        alias = "dflt_value",
        alias = "default_value"
    )]
    pub default: Option<String>,
    #[serde(default, alias = "pk", alias = "is_primary_key", deserialize_with = "flex_bool")]
    pub primary_key: bool,
    #[serde(
        default,
        alias = "is_identity",
        alias = "IS_AUTOINCREMENT",
        alias = "autoincrement",
        deserialize_with = "flex_bool"
    )]
    pub auto_increment: bool,
}

impl ColumnRaw {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal: i32) -> Self {
        Self {
            table: None,
            name: name.into(),
            data_type: data_type.into(),
            nullable: None,
            not_null: None,
            ordinal,
            default: None,
            primary_key: false,
            auto_increment: false,
        }
    }

    /// Nullability from whichever flag the engine reported; nullable if neither.
    pub fn is_nullable(&self) -> bool {
        match (self.nullable, self.not_null) {
            (Some(nullable), _) => nullable,
            (None, Some(not_null)) => !not_null,
            (None, None) => true,
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.auto_increment
            || self
                .default
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains("nextval("))
    }
}

/// Index description: either one row with every column, or one row per
/// column sharing the index name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRaw {
    #[serde(alias = "INDEX_NAME", alias = "index_name", alias = "indexname")]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, alias = "COLUMN_NAME", alias = "column_name")]
    pub column: Option<String>,
    #[serde(default, alias = "SEQ_IN_INDEX", alias = "seqno")]
    pub position: Option<i32>,
    #[serde(default, alias = "is_unique", alias = "indisunique", deserialize_with = "flex_bool")]
    pub unique: bool,
    #[serde(default, alias = "is_primary", alias = "indisprimary", deserialize_with = "flex_bool")]
    pub primary: bool,
}

impl IndexRaw {
    pub fn new(name: impl Into<String>, columns: &[&str], unique: bool, primary: bool) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            column: None,
            position: None,
            unique,
            primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
    #[default]
    Other,
}

impl ConstraintKind {
    pub fn from_catalog(value: &str) -> ConstraintKind {
        match value.trim().to_lowercase().replace('_', " ").as_str() {
            "p" | "primary key" | "primary" => ConstraintKind::PrimaryKey,
            "u" | "unique" => ConstraintKind::Unique,
            "f" | "r" | "foreign key" | "foreign" | "references" => ConstraintKind::ForeignKey,
            "c" | "check" => ConstraintKind::Check,
            _ => ConstraintKind::Other,
        }
    }
}

fn constraint_kind<'de, D>(deserializer: D) -> Result<ConstraintKind, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(ConstraintKind::from_catalog(&s))
}

/// One column of a constraint. Multi-column constraints are several rows
/// sharing a name, ordered by `position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRaw {
    #[serde(default, alias = "CONSTRAINT_NAME", alias = "constraint_name", alias = "conname")]
    pub name: String,
    #[serde(
        alias = "CONSTRAINT_TYPE",
        alias = "constraint_type",
        alias = "contype",
        deserialize_with = "constraint_kind"
    )]
    pub kind: ConstraintKind,
    #[serde(alias = "COLUMN_NAME", alias = "column_name", alias = "from")]
    pub column: String,
    #[serde(
        default,
        alias = "REFERENCED_TABLE_NAME",
        alias = "referenced_table_name",
        alias = "foreign_table_name"
    )]
    pub ref_table: Option<String>,
    #[serde(
        default,
        alias = "REFERENCED_COLUMN_NAME",
        alias = "referenced_column_name",
        alias = "foreign_column_name",
        alias = "to"
    )]
    pub ref_column: Option<String>,
    #[serde(default, alias = "ORDINAL_POSITION", alias = "ordinal_position", alias = "seq")]
    pub position: i32,
}

impl ConstraintRaw {
    pub fn foreign_key(
        name: impl Into<String>,
        column: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
        position: i32,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::ForeignKey,
            column: column.into(),
            ref_table: Some(ref_table.into()),
            ref_column: Some(ref_column.into()),
            position,
        }
    }
}

/// Enum type, either with all values or one row per value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumRaw {
    #[serde(alias = "enum_name", alias = "typname")]
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default, alias = "enum_value", alias = "enumlabel")]
    pub value: Option<String>,
    #[serde(default, alias = "enumsortorder")]
    pub position: Option<f64>,
}

impl EnumRaw {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
            value: None,
            position: None,
        }
    }
}

/// Everything the reader returned for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    #[serde(flatten)]
    pub table: TableRaw,
    #[serde(default)]
    pub columns: Vec<ColumnRaw>,
    #[serde(default)]
    pub indexes: Vec<IndexRaw>,
    #[serde(default)]
    pub constraints: Vec<ConstraintRaw>,
}

impl RawTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: TableRaw::new(name, TableKind::Table),
            columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn view(mut self) -> Self {
        self.table.kind = TableKind::View;
        self
    }

    pub fn column(mut self, name: &str, data_type: &str, nullable: bool) -> Self {
        let ordinal = self.columns.len() as i32 + 1;
        let mut column = ColumnRaw::new(name, data_type, ordinal);
        column.nullable = Some(nullable);
        self.columns.push(column);
        self
    }

    pub fn serial(mut self, name: &str, data_type: &str) -> Self {
        let ordinal = self.columns.len() as i32 + 1;
        let mut column = ColumnRaw::new(name, data_type, ordinal);
        column.nullable = Some(false);
        column.default = Some(format!("nextval('{}_{name}_seq'::regclass)", self.table.name));
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        let name = format!("{}_pkey", self.table.name);
        self.indexes.push(IndexRaw::new(name, columns, true, true));
        self
    }

    pub fn index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexRaw::new(name, columns, unique, false));
        self
    }

    pub fn foreign_key(
        mut self,
        name: &str,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> Self {
        for (i, (column, ref_column)) in columns.iter().zip(ref_columns).enumerate() {
            self.constraints.push(ConstraintRaw::foreign_key(
                name,
                *column,
                ref_table,
                *ref_column,
                i as i32 + 1,
            ));
        }
        self
    }
}

/// A complete catalog for one schema, as collected from a reader or loaded
/// from a dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawCatalog {
    pub schema: String,
    #[serde(default)]
    pub tables: Vec<RawTable>,
    #[serde(default)]
    pub enums: Vec<EnumRaw>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information_schema_column() {
        let json = r#"{
            "TABLE_NAME": "orders",
            "COLUMN_NAME": "total",
            "DATA_TYPE": "numeric",
            "IS_NULLABLE": "YES",
            "ORDINAL_POSITION": 3,
            "COLUMN_DEFAULT": null
        }"#;
        let col: ColumnRaw = serde_json::from_str(json).unwrap();
        assert_eq!(col.table.as_deref(), Some("orders"));
        assert_eq!(col.name, "total");
        assert_eq!(col.ordinal, 3);
        assert!(col.is_nullable());
        assert!(!col.is_sequence());
    }

    #[test]
    fn test_sqlite_pragma_column() {
        let json = r#"{"cid": 0, "name": "id", "type": "INTEGER", "notnull": 1, "dflt_value": null, "pk": 1}"#;
        let col: ColumnRaw = serde_json::from_str(json).unwrap();
        assert_eq!(col.data_type, "INTEGER");
        assert!(!col.is_nullable());
        assert!(col.primary_key);
    }

    #[test]
    fn test_serial_default_is_sequence() {
        let mut col = ColumnRaw::new("id", "integer", 1);
        col.default = Some("nextval('orders_id_seq'::regclass)".into());
        assert!(col.is_sequence());
    }

    #[test]
    fn test_table_kind_spellings() {
        assert_eq!(TableKind::from_catalog("BASE TABLE"), TableKind::Table);
        assert_eq!(TableKind::from_catalog("VIEW"), TableKind::View);
        assert_eq!(TableKind::from_catalog("m"), TableKind::MaterializedView);
        assert_eq!(TableKind::from_catalog("foreign_table"), TableKind::ForeignTable);
        let t: TableRaw =
            serde_json::from_str(r#"{"TABLE_NAME": "v_orders", "TABLE_TYPE": "VIEW"}"#).unwrap();
        assert_eq!(t.kind, TableKind::View);
    }

    #[test]
    fn test_constraint_kind_spellings() {
        assert_eq!(ConstraintKind::from_catalog("FOREIGN KEY"), ConstraintKind::ForeignKey);
        assert_eq!(ConstraintKind::from_catalog("f"), ConstraintKind::ForeignKey);
        assert_eq!(ConstraintKind::from_catalog("PRIMARY_KEY"), ConstraintKind::PrimaryKey);
        assert_eq!(ConstraintKind::from_catalog("UNIQUE"), ConstraintKind::Unique);
        assert_eq!(ConstraintKind::from_catalog("x"), ConstraintKind::Other);
    }

    #[test]
    fn test_mysql_constraint_row() {
        let json = r#"{
            "CONSTRAINT_NAME": "fk_orders_customer",
            "CONSTRAINT_TYPE": "FOREIGN KEY",
            "COLUMN_NAME": "customer_id",
            "REFERENCED_TABLE_NAME": "customers",
            "REFERENCED_COLUMN_NAME": "id",
            "ORDINAL_POSITION": 1
        }"#;
        let c: ConstraintRaw = serde_json::from_str(json).unwrap();
        assert_eq!(c.kind, ConstraintKind::ForeignKey);
        assert_eq!(c.ref_table.as_deref(), Some("customers"));
        assert_eq!(c.ref_column.as_deref(), Some("id"));
    }

    #[test]
    fn test_bad_boolean_rejected() {
        let json = r#"{"name": "x", "data_type": "int", "ordinal": 1, "nullable": "maybe"}"#;
        assert!(serde_json::from_str::<ColumnRaw>(json).is_err());
    }

    #[test]
    fn test_raw_table_builder() {
        let t = RawTable::new("orders")
            .serial("id", "integer")
            .column("customer_id", "integer", false)
            .primary_key(&["id"])
            .foreign_key("orders_customer_fk", &["customer_id"], "customers", &["id"]);
        assert_eq!(t.columns.len(), 2);
        assert_eq!(t.columns[1].ordinal, 2);
        assert!(t.columns[0].is_sequence());
        assert_eq!(t.indexes[0].name, "orders_pkey");
        assert_eq!(t.constraints.len(), 1);
    }
}
