//! Rows, schemas and scan destinations.
//!
//! A [`Row`] owns its values and shares its [`Schema`] with every other row
//! of the same result set. Values are read by column name or index, either
//! directly ([`Row::get`], [`Row::get_at`]) or into a [`Dest`] declared
//! beforehand with `prep` on a result.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rdb_types::{FromSql, SqlType, SqlValue, TypeError};

use crate::error::{Error, Result};

/// Column metadata describing a result set column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column index (0-based).
    pub index: usize,
    /// Declared type.
    pub sql_type: SqlType,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Maximum length for variable-length types.
    pub length: Option<usize>,
}

impl Column {
    /// Create a new column.
    pub fn new(name: impl Into<String>, index: usize, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            index,
            sql_type,
            nullable: true,
            length: None,
        }
    }

    /// Set whether this column is nullable.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set the maximum length.
    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

/// The ordered columns of a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Create a schema from columns. Column indexes are renumbered to
    /// match their position.
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(index, column)| Column { index, ..column })
            .collect();
        Self { columns }
    }

    /// Create a schema from `(name, type)` pairs.
    #[must_use]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, SqlType)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .enumerate()
                .map(|(i, (name, ty))| Column::new(name, i, ty))
                .collect(),
        )
    }

    /// Get the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if there are no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get a column by index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Get all columns.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Find a column index by name.
    ///
    /// An exact match wins; otherwise the first case-insensitive match.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    fn resolve(&self, column: &ColumnRef) -> Result<usize> {
        match column {
            ColumnRef::Name(name) => self
                .find(name)
                .ok_or_else(|| Error::UnknownColumn(name.clone())),
            ColumnRef::Index(index) if *index < self.columns.len() => Ok(*index),
            ColumnRef::Index(index) => Err(Error::UnknownColumn(format!("#{index}"))),
        }
    }
}

/// A column reference by name or position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// By name.
    Name(String),
    /// By 0-based index.
    Index(usize),
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "#{index}"),
        }
    }
}

/// A shared destination for scanned column values.
///
/// Clones share the same slot, so the caller keeps one handle and gives
/// another to `prep`; each scan overwrites the value.
///
/// ```rust,ignore
/// let name = Dest::<String>::new();
/// let mut result = next.result(&cancel).await?;
/// result.prep("name", &name);
/// while let Ok(_) = result.scan(&cancel).await {
///     println!("{:?}", name.get());
/// }
/// ```
pub struct Dest<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Dest<T> {
    /// Create an empty destination.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Take the current value, leaving the destination empty.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Check if a value has been stored.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T: Clone> Dest<T> {
    /// Get a copy of the current value.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.slot.lock().clone()
    }
}

impl<T> Clone for Dest<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Dest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Dest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dest").field(&*self.slot.lock()).finish()
    }
}

/// Type-erased writer into a destination.
pub(crate) trait Sink: Send + Sync {
    fn store(&self, value: &SqlValue) -> std::result::Result<(), TypeError>;
}

impl<T: FromSql + Send> Sink for Dest<T> {
    fn store(&self, value: &SqlValue) -> std::result::Result<(), TypeError> {
        let converted = T::from_sql(value)?;
        *self.slot.lock() = Some(converted);
        Ok(())
    }
}

/// Destinations declared on a result, resolved against its schema at the
/// first scan.
#[derive(Default)]
pub(crate) struct Bindings {
    declared: Vec<(ColumnRef, Box<dyn Sink>)>,
    resolved: Option<Vec<(usize, Box<dyn Sink>)>>,
}

impl Bindings {
    pub(crate) fn prep<T: FromSql + Send + 'static>(&mut self, column: ColumnRef, dest: &Dest<T>) {
        if let Some(resolved) = self.resolved.take() {
            self.declared.extend(
                resolved
                    .into_iter()
                    .map(|(index, sink)| (ColumnRef::Index(index), sink)),
            );
        }
        self.declared.push((column, Box::new(dest.clone())));
    }

    /// Resolve pending declarations, then store `row` into every destination.
    pub(crate) fn apply(&mut self, schema: &Schema, row: &[SqlValue]) -> Result<()> {
        if self.resolved.is_none() {
            let mut seen = HashSet::new();
            let mut indexes = Vec::with_capacity(self.declared.len());
            for (column, _) in &self.declared {
                let index = schema.resolve(column)?;
                if !seen.insert(index) {
                    return Err(Error::DuplicateBinding(column.to_string()));
                }
                indexes.push(index);
            }
            let sinks = self.declared.drain(..).map(|(_, sink)| sink);
            self.resolved = Some(indexes.into_iter().zip(sinks).collect());
        }
        if let Some(resolved) = &self.resolved {
            for (index, sink) in resolved {
                if let Some(value) = row.get(*index) {
                    sink.store(value)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("declared", &self.declared.len())
            .field(
                "resolved",
                &self.resolved.as_ref().map(|r| r.iter().map(|(i, _)| *i).collect::<Vec<_>>()),
            )
            .finish()
    }
}

/// A row from a query result.
#[derive(Clone)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row. Missing trailing values read as NULL.
    #[must_use]
    pub fn new(schema: Arc<Schema>, values: Vec<SqlValue>) -> Self {
        Self { schema, values }
    }

    /// Get a value by column name, converted to `T`.
    pub fn get<T: FromSql>(&self, name: &str) -> Result<T> {
        Ok(T::from_sql(self.value(name)?)?)
    }

    /// Get a value by column index, converted to `T`.
    pub fn get_at<T: FromSql>(&self, index: usize) -> Result<T> {
        Ok(T::from_sql(self.value_at(index)?)?)
    }

    /// Get the raw value by column name.
    pub fn value(&self, name: &str) -> Result<&SqlValue> {
        let index = self
            .schema
            .find(name)
            .ok_or_else(|| Error::UnknownColumn(name.to_string()))?;
        self.value_at(index)
    }

    /// Get the raw value by column index.
    pub fn value_at(&self, index: usize) -> Result<&SqlValue> {
        static NULL: SqlValue = SqlValue::Null;
        if index >= self.schema.len() {
            return Err(Error::UnknownColumn(format!("#{index}")));
        }
        Ok(self.values.get(index).unwrap_or(&NULL))
    }

    /// Store the value of column `name` into `dest`.
    pub fn into_dest<T: FromSql + Send>(&self, name: &str, dest: &Dest<T>) -> Result<&Self> {
        dest.store(self.value(name)?)?;
        Ok(self)
    }

    /// Store the value of column `index` into `dest`.
    pub fn into_dest_at<T: FromSql + Send>(&self, index: usize, dest: &Dest<T>) -> Result<&Self> {
        dest.store(self.value_at(index)?)?;
        Ok(self)
    }

    /// Check if a column is NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.values.get(index).is_none_or(SqlValue::is_null)
    }

    /// Get the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schema.len()
    }

    /// Check if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schema.is_empty()
    }

    /// Get the schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Get the raw values.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consume the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (column, value) in self.schema.columns().iter().zip(&self.values) {
            map.entry(&column.name, value);
        }
        map.finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::from_pairs([
            ("id", SqlType::Int),
            ("Name", SqlType::Text),
        ]))
    }

    #[test]
    fn test_schema_find() {
        let schema = schema();
        assert_eq!(schema.find("id"), Some(0));
        assert_eq!(schema.find("name"), Some(1));
        assert_eq!(schema.find("missing"), None);
        assert_eq!(schema.get(1).unwrap().index, 1);
    }

    #[test]
    fn test_row_get() {
        let row = Row::new(schema(), vec![SqlValue::Int(7), SqlValue::from("ann")]);
        assert_eq!(row.get::<i32>("id").unwrap(), 7);
        assert_eq!(row.get_at::<String>(1).unwrap(), "ann");
        assert!(matches!(row.get::<i32>("nope"), Err(Error::UnknownColumn(_))));
        assert!(matches!(row.value_at(2), Err(Error::UnknownColumn(_))));
    }

    #[test]
    fn test_row_missing_value_is_null() {
        let row = Row::new(schema(), vec![SqlValue::Int(1)]);
        assert!(row.value_at(1).unwrap().is_null());
        assert!(row.is_null(1));
        assert_eq!(row.get::<Option<String>>("Name").unwrap(), None);
    }

    #[test]
    fn test_row_into_dest_chains() {
        let row = Row::new(schema(), vec![SqlValue::Int(3), SqlValue::from("bo")]);
        let id = Dest::<i64>::new();
        let name = Dest::<String>::new();
        row.into_dest("id", &id)
            .unwrap()
            .into_dest_at(1, &name)
            .unwrap();
        assert_eq!(id.get(), Some(3));
        assert_eq!(name.take(), Some("bo".to_string()));
        assert!(!name.is_set());
    }

    #[test]
    fn test_bindings_resolve_and_apply() {
        let schema = schema();
        let id = Dest::<i32>::new();
        let name = Dest::<String>::new();
        let mut bindings = Bindings::default();
        bindings.prep(ColumnRef::Index(0), &id);
        bindings.prep(ColumnRef::Name("name".into()), &name);

        bindings
            .apply(&schema, &[SqlValue::Int(1), SqlValue::from("a")])
            .unwrap();
        bindings
            .apply(&schema, &[SqlValue::Int(2), SqlValue::from("b")])
            .unwrap();
        assert_eq!(id.get(), Some(2));
        assert_eq!(name.get().as_deref(), Some("b"));
    }

    #[test]
    fn test_bindings_errors_at_first_apply() {
        let schema = schema();
        let a = Dest::<i32>::new();
        let mut unknown = Bindings::default();
        unknown.prep(ColumnRef::Name("zzz".into()), &a);
        assert!(matches!(
            unknown.apply(&schema, &[]),
            Err(Error::UnknownColumn(_))
        ));

        let mut duplicate = Bindings::default();
        duplicate.prep(ColumnRef::Name("id".into()), &a);
        duplicate.prep(ColumnRef::Index(0), &a);
        assert!(matches!(
            duplicate.apply(&schema, &[]),
            Err(Error::DuplicateBinding(_))
        ));
    }
}
