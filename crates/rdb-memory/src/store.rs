//! Transactional key/value storage.
//!
//! The server holds the committed map. Each session writes into a
//! [`Writes`] overlay: per statement when no transaction is open, for the
//! whole transaction otherwise. Savepoints snapshot the overlay.

use std::collections::BTreeMap;

use rdb_client::{Error, IsolationLevel, Result, SqlValue};

/// Committed rows.
pub(crate) type Committed = BTreeMap<String, SqlValue>;

/// Pending writes; `None` marks a delete.
#[derive(Debug, Clone, Default)]
pub(crate) struct Writes {
    changes: BTreeMap<String, Option<SqlValue>>,
}

impl Writes {
    pub(crate) fn get(&self, committed: &Committed, key: &str) -> Option<SqlValue> {
        match self.changes.get(key) {
            Some(change) => change.clone(),
            None => committed.get(key).cloned(),
        }
    }

    pub(crate) fn put(&mut self, key: String, value: SqlValue) {
        self.changes.insert(key, Some(value));
    }

    pub(crate) fn delete(&mut self, committed: &Committed, key: &str) -> bool {
        let existed = self.get(committed, key).is_some();
        self.changes.insert(key.to_string(), None);
        existed
    }

    /// Visible rows whose key starts with `prefix`, in key order.
    pub(crate) fn scan(&self, committed: &Committed, prefix: &str) -> Vec<(String, SqlValue)> {
        let mut merged: BTreeMap<&str, &SqlValue> = committed
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        for (key, change) in self
            .changes
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match change {
                Some(value) => {
                    merged.insert(key.as_str(), value);
                }
                None => {
                    merged.remove(key.as_str());
                }
            }
        }
        merged
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    pub(crate) fn apply(self, committed: &mut Committed) {
        for (key, change) in self.changes {
            match change {
                Some(value) => {
                    committed.insert(key, value);
                }
                None => {
                    committed.remove(&key);
                }
            }
        }
    }
}

/// An open transaction on one session.
#[derive(Debug)]
pub(crate) struct TxState {
    pub(crate) isolation: IsolationLevel,
    pub(crate) writes: Writes,
    savepoints: Vec<(String, Writes)>,
}

impl TxState {
    pub(crate) fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            writes: Writes::default(),
            savepoints: Vec::new(),
        }
    }

    pub(crate) fn save_point(&mut self, name: &str) {
        self.savepoints.retain(|(n, _)| n != name);
        self.savepoints.push((name.to_string(), self.writes.clone()));
    }

    pub(crate) fn rollback_to(&mut self, name: &str) -> Result<()> {
        let position = self
            .savepoints
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::UnknownSavepoint(name.to_string()))?;
        self.savepoints.truncate(position + 1);
        if let Some((_, snapshot)) = self.savepoints.last() {
            self.writes = snapshot.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn committed() -> Committed {
        let mut map = Committed::new();
        map.insert("a:1".into(), SqlValue::Int(1));
        map.insert("a:2".into(), SqlValue::Int(2));
        map.insert("b:1".into(), SqlValue::Int(3));
        map
    }

    #[test]
    fn test_overlay_reads_and_scan() {
        let committed = committed();
        let mut writes = Writes::default();
        writes.put("a:3".into(), SqlValue::Int(9));
        assert!(writes.delete(&committed, "a:1"));
        assert!(!writes.delete(&committed, "zzz"));

        assert_eq!(writes.get(&committed, "a:1"), None);
        assert_eq!(writes.get(&committed, "a:2"), Some(SqlValue::Int(2)));
        let keys: Vec<_> = writes
            .scan(&committed, "a:")
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a:2", "a:3"]);
    }

    #[test]
    fn test_apply() {
        let mut committed = committed();
        let mut writes = Writes::default();
        writes.put("c".into(), SqlValue::Int(4));
        writes.delete(&committed, "b:1");
        writes.apply(&mut committed);
        assert_eq!(committed.len(), 3);
        assert!(!committed.contains_key("b:1"));
    }

    #[test]
    fn test_savepoints() {
        let mut tx = TxState::new(IsolationLevel::Serializable);
        tx.writes.put("x".into(), SqlValue::Int(1));
        tx.save_point("one");
        tx.writes.put("y".into(), SqlValue::Int(2));
        tx.save_point("two");
        tx.writes.put("z".into(), SqlValue::Int(3));

        tx.rollback_to("one").unwrap();
        let empty = Committed::new();
        assert!(tx.writes.get(&empty, "x").is_some());
        assert!(tx.writes.get(&empty, "y").is_none());
        assert!(matches!(tx.rollback_to("two"), Err(Error::UnknownSavepoint(_))));
        tx.rollback_to("one").unwrap();
    }

    proptest::proptest! {
        /// Staging writes then applying them matches writing straight to
        /// the committed map.
        #[test]
        fn test_overlay_matches_direct_writes(
            ops in proptest::collection::vec((0u8..8, proptest::option::of(0i32..100)), 0..40)
        ) {
            let base = committed();
            let mut direct = base.clone();
            let mut writes = Writes::default();
            for (key, value) in ops {
                let key = format!("a:{key}");
                match value {
                    Some(v) => {
                        direct.insert(key.clone(), SqlValue::Int(v));
                        writes.put(key, SqlValue::Int(v));
                    }
                    None => {
                        let existed = direct.remove(&key).is_some();
                        proptest::prop_assert_eq!(writes.delete(&base, &key), existed);
                    }
                }
            }
            let expected: Vec<_> = direct
                .iter()
                .filter(|(k, _)| k.starts_with("a:"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            proptest::prop_assert_eq!(writes.scan(&base, "a:"), expected);

            let mut applied = base.clone();
            writes.apply(&mut applied);
            proptest::prop_assert_eq!(applied, direct);
        }
    }
}
