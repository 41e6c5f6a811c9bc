use std::{fs, path::Path, sync::Arc};

use serde::Deserialize;

use crate::database::postgres::{
    client::PostgresClient,
    record::Record,
    statement::LoadSpec,
};

/// Fallback configuration exposed by a domain object, consulted for every key
/// the explicit [`LoadOptions`] leave out.
pub trait LoadDefaults: Send + Sync {
    fn table(&self) -> Option<String> {
        None
    }

    fn tempname(&self) -> Option<String> {
        None
    }

    fn insert_cols(&self) -> Option<Vec<String>> {
        None
    }

    fn update_cols(&self) -> Option<Vec<String>> {
        None
    }

    fn key_cols(&self) -> Option<Vec<String>> {
        None
    }

    fn dbh(&self) -> Option<Arc<PostgresClient>> {
        None
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadOptionsError {
    #[error("Could not read load options file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse load options: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Explicit configuration for `statement`, `copy` and `upsert`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadOptions {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub tempname: Option<String>,
    #[serde(default)]
    pub insert_cols: Option<Vec<String>>,
    #[serde(default)]
    pub update_cols: Option<Vec<String>>,
    #[serde(default)]
    pub key_cols: Option<Vec<String>>,
    #[serde(skip)]
    pub dbh: Option<Arc<PostgresClient>>,
}

impl LoadOptions {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, LoadOptionsError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, LoadOptionsError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }
}

/// Options after fallback resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolvedArgs {
    pub kind: Option<String>,
    pub spec: LoadSpec,
    pub dbh: Option<Arc<PostgresClient>>,
}

fn non_empty_name(value: Option<String>) -> Option<String> {
    value.filter(|name| !name.is_empty())
}

fn non_empty_columns(value: Option<Vec<String>>) -> Option<Vec<String>> {
    value.filter(|columns| !columns.is_empty())
}

/// Merges explicit options with the prototype's defaults, explicit winning.
///
/// Keys neither source provides stay absent; the statement renderers report
/// them as missing when they are needed.
pub fn resolve(options: &LoadOptions, prototype: Option<&dyn LoadDefaults>) -> ResolvedArgs {
    let table = non_empty_name(options.table.clone())
        .or_else(|| prototype.and_then(|p| non_empty_name(p.table())));
    let temp_table = non_empty_name(options.tempname.clone())
        .or_else(|| prototype.and_then(|p| non_empty_name(p.tempname())));
    let insert_columns = non_empty_columns(options.insert_cols.clone())
        .or_else(|| prototype.and_then(|p| non_empty_columns(p.insert_cols())));
    let update_columns = non_empty_columns(options.update_cols.clone())
        .or_else(|| prototype.and_then(|p| non_empty_columns(p.update_cols())));
    let key_columns = non_empty_columns(options.key_cols.clone())
        .or_else(|| prototype.and_then(|p| non_empty_columns(p.key_cols())));
    let dbh = options.dbh.clone().or_else(|| prototype.and_then(|p| p.dbh()));

    ResolvedArgs {
        kind: options.kind.clone(),
        spec: LoadSpec {
            table,
            temp_table,
            insert_columns: insert_columns.unwrap_or_default(),
            update_columns: update_columns.unwrap_or_default(),
            key_columns: key_columns.unwrap_or_default(),
        },
        dbh,
    }
}

/// Removes the leading record when it is a configuration object rather than
/// a row, returning it so its defaults can be used.
pub fn take_prototype(records: &mut Vec<Record>) -> Option<Record> {
    let is_prototype =
        records.first().map(|record| record.load_defaults().is_some()).unwrap_or(false);

    if is_prototype {
        Some(records.remove(0))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::database::postgres::record::RecordAccessor;

    #[derive(Debug)]
    struct TokenTable;

    impl LoadDefaults for TokenTable {
        fn table(&self) -> Option<String> {
            Some("tokens".to_string())
        }

        fn insert_cols(&self) -> Option<Vec<String>> {
            Some(vec!["a".to_string(), "b".to_string()])
        }

        fn key_cols(&self) -> Option<Vec<String>> {
            Some(vec!["a".to_string()])
        }
    }

    impl RecordAccessor for TokenTable {
        fn value(&self, _column: &str) -> Option<Value> {
            None
        }

        fn load_defaults(&self) -> Option<&dyn LoadDefaults> {
            Some(self)
        }
    }

    #[test]
    fn test_explicit_options_fall_back_to_prototype() {
        let options = LoadOptions { table: Some("foo".to_string()), ..Default::default() };

        let resolved = resolve(&options, Some(&TokenTable));

        assert_eq!(resolved.spec.table.as_deref(), Some("foo"));
        assert_eq!(resolved.spec.insert_columns, vec!["a", "b"]);
        assert_eq!(resolved.spec.key_columns, vec!["a"]);
        assert!(resolved.spec.update_columns.is_empty());
        assert!(resolved.spec.temp_table.is_none());
    }

    #[test]
    fn test_explicit_options_win() {
        let options = LoadOptions {
            table: Some("foo".to_string()),
            insert_cols: Some(vec!["x".to_string()]),
            ..Default::default()
        };

        let resolved = resolve(&options, Some(&TokenTable));

        assert_eq!(resolved.spec.insert_columns, vec!["x"]);
    }

    #[test]
    fn test_empty_explicit_values_count_as_absent() {
        let options = LoadOptions {
            table: Some(String::new()),
            insert_cols: Some(Vec::new()),
            ..Default::default()
        };

        let resolved = resolve(&options, Some(&TokenTable));
        assert_eq!(resolved.spec.table.as_deref(), Some("tokens"));
        assert_eq!(resolved.spec.insert_columns, vec!["a", "b"]);

        let resolved = resolve(&options, None);
        assert!(resolved.spec.table.is_none());
        assert!(resolved.spec.insert_columns.is_empty());
        assert!(resolved.dbh.is_none());
    }

    #[test]
    fn test_take_prototype() {
        let row = match json!({"a": 1}) {
            Value::Object(map) => Record::Map(map),
            _ => unreachable!(),
        };

        let mut records = vec![Record::Accessor(Arc::new(TokenTable)), row.clone()];
        let prototype = take_prototype(&mut records);
        assert!(prototype.is_some());
        assert_eq!(records.len(), 1);

        let mut rows_only = vec![row.clone(), Record::Accessor(Arc::new(TokenTable))];
        assert!(take_prototype(&mut rows_only).is_none());
        assert_eq!(rows_only.len(), 2);

        let mut empty: Vec<Record> = Vec::new();
        assert!(take_prototype(&mut empty).is_none());
    }

    #[test]
    fn test_load_options_from_yaml() {
        let options = LoadOptions::from_yaml_str(
            "type: upsert\ntable: foo\ntempname: tfoo\ninsert_cols: [foo, bar, baz]\nupdate_cols: [foo, bar]\nkey_cols: [baz]\n",
        )
        .unwrap();

        assert_eq!(options.kind.as_deref(), Some("upsert"));
        assert_eq!(options.table.as_deref(), Some("foo"));
        assert_eq!(options.tempname.as_deref(), Some("tfoo"));
        assert_eq!(options.insert_cols, Some(vec!["foo".into(), "bar".into(), "baz".into()]));
        assert_eq!(options.key_cols, Some(vec!["baz".into()]));
        assert!(options.dbh.is_none());

        assert!(LoadOptions::from_yaml_str("tabel: foo\n").is_err());
    }

    #[test]
    fn test_load_options_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("load.yaml");
        fs::write(&path, "table: foo\ninsert_cols: [a]\n").unwrap();

        let options = LoadOptions::from_yaml_file(&path).unwrap();
        assert_eq!(options.table.as_deref(), Some("foo"));
        assert!(options.kind.is_none());

        assert!(matches!(
            LoadOptions::from_yaml_file(&dir.path().join("missing.yaml")),
            Err(LoadOptionsError::Io(_))
        ));
    }
}
