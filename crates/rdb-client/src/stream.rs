//! Multi-result query cursors.
//!
//! A query returns a [`Next`]: the result sets it produced, not yet read.
//! Each call to [`Next::result`] yields a streaming [`QueryStream`] over the
//! next set; [`Next::buffer`] reads the next set fully into a [`Buffer`]
//! instead. Moving on to the following set discards whatever was left
//! unread of the current one.
//!
//! ```rust,ignore
//! let mut next = pool.query(&cancel, &cmd, params).await?;
//! loop {
//!     let mut result = match next.result(&cancel).await {
//!         Ok(result) => result,
//!         Err(Error::NoMoreResults) => break,
//!         Err(e) => return Err(e),
//!     };
//!     loop {
//!         match result.scan(&cancel).await {
//!             Ok(row) => println!("{row:?}"),
//!             Err(Error::EndOfRows) => break,
//!             Err(e) => return Err(e),
//!         }
//!     }
//! }
//! ```
//!
//! Output parameters are published when `result` or `buffer` reports
//! [`Error::NoMoreResults`] for the first time. The connection behind a
//! pooled query goes back to the pool at that moment too, or when the
//! `Next` is dropped.

use std::fmt;
use std::sync::Arc;

use rdb_types::FromSql;
use tokio_util::sync::CancellationToken;

use crate::cancel;
use crate::driver::{Execution, Release, ResultSource};
use crate::error::{Error, Result};
use crate::param::OutputBindings;
use crate::row::{Bindings, ColumnRef, Dest, Row, Schema};

#[derive(Debug, Default)]
struct Cursor {
    in_set: bool,
    failed: bool,
}

/// The pending result sets of one query.
///
/// `'a` is the borrow of the connection or transaction the query ran on;
/// queries issued on a pool hold their own lease and are `Next<'static>`.
pub struct Next<'a> {
    source: Box<dyn ResultSource>,
    outputs: Option<OutputBindings>,
    trunc_long_text: bool,
    cursor: Cursor,
    done: bool,
    sets: usize,
    guard: Option<Box<dyn Release + 'a>>,
}

impl<'a> Next<'a> {
    /// Wrap a driver execution.
    #[must_use]
    pub fn new(execution: Execution, trunc_long_text: bool) -> Self {
        Self {
            source: execution.source,
            outputs: Some(execution.outputs),
            trunc_long_text,
            cursor: Cursor::default(),
            done: false,
            sets: 0,
            guard: None,
        }
    }

    /// Attach a guard released when this cursor is drained or dropped.
    #[must_use]
    pub fn with_guard(mut self, guard: impl Release + 'a) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Advance to the next result set and stream it.
    ///
    /// Returns [`Error::NoMoreResults`] once every set has been consumed.
    pub async fn result(&mut self, cancel: &CancellationToken) -> Result<QueryStream<'_>> {
        if self.done {
            return Err(Error::NoMoreResults);
        }
        if self.cursor.failed {
            self.finish(false);
            return Err(Error::NoMoreResults);
        }
        if self.cursor.in_set {
            let discarded = cancel::run(cancel, self.source.discard(cancel)).await;
            if let Err(e) = discarded {
                return Err(self.fail(e));
            }
            self.cursor.in_set = false;
        }

        match cancel::run(cancel, self.source.next_set(cancel)).await {
            Ok(Some(schema)) => {
                self.sets += 1;
                self.cursor.in_set = true;
                tracing::trace!(set = self.sets, columns = schema.len(), "result set");
                Ok(QueryStream {
                    schema: Arc::new(schema),
                    source: &mut self.source,
                    cursor: &mut self.cursor,
                    bindings: Bindings::default(),
                })
            }
            Ok(None) => {
                let published = self.publish_outputs();
                self.finish(true);
                published.and(Err(Error::NoMoreResults))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Read the whole next result set into memory.
    ///
    /// Sequencing is identical to [`result`](Self::result).
    pub async fn buffer(&mut self, cancel: &CancellationToken) -> Result<Buffer> {
        let mut stream = self.result(cancel).await?;
        let schema = Arc::clone(stream.schema());
        let mut rows = Vec::new();
        loop {
            match stream.scan(cancel).await {
                Ok(row) => rows.push(row),
                Err(Error::EndOfRows) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Buffer::new(schema, rows))
    }

    /// Number of result sets returned so far.
    #[must_use]
    pub fn sets_read(&self) -> usize {
        self.sets
    }

    /// Check if every result set has been consumed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn publish_outputs(&mut self) -> Result<()> {
        match self.outputs.take() {
            Some(outputs) if !outputs.is_empty() => {
                outputs.publish(self.source.take_outputs(), self.trunc_long_text)
            }
            _ => Ok(()),
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::debug!(error = %error, "query cursor failed");
        self.finish(false);
        error
    }

    fn finish(&mut self, drained: bool) {
        self.done = true;
        self.cursor.in_set = false;
        if let Some(guard) = self.guard.take() {
            guard.release(drained);
        }
    }
}

impl Drop for Next<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            tracing::trace!(sets = self.sets, "query cursor dropped before drained");
            guard.release(false);
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("sets", &self.sets)
            .field("in_set", &self.cursor.in_set)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// A streaming view of one result set.
///
/// Borrowed from its [`Next`]; only one can be active at a time.
pub struct QueryStream<'n> {
    schema: Arc<Schema>,
    source: &'n mut Box<dyn ResultSource>,
    cursor: &'n mut Cursor,
    bindings: Bindings,
}

impl QueryStream<'_> {
    /// Get the result set's schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Store column `name` of every scanned row into `dest`.
    ///
    /// Unknown or duplicate columns are reported by the first `scan`.
    pub fn prep<T: FromSql + Send + 'static>(&mut self, name: &str, dest: &Dest<T>) -> &mut Self {
        self.bindings.prep(ColumnRef::Name(name.to_string()), dest);
        self
    }

    /// Store column `index` of every scanned row into `dest`.
    pub fn prep_at<T: FromSql + Send + 'static>(&mut self, index: usize, dest: &Dest<T>) -> &mut Self {
        self.bindings.prep(ColumnRef::Index(index), dest);
        self
    }

    /// Read the next row.
    ///
    /// Returns [`Error::EndOfRows`] once the set is exhausted, and on every
    /// call after that.
    pub async fn scan(&mut self, cancel: &CancellationToken) -> Result<Row> {
        if !self.cursor.in_set {
            return Err(Error::EndOfRows);
        }
        match cancel::run(cancel, self.source.next_row(cancel)).await {
            Ok(Some(values)) => {
                self.bindings.apply(&self.schema, &values)?;
                Ok(Row::new(Arc::clone(&self.schema), values))
            }
            Ok(None) => {
                self.cursor.in_set = false;
                Err(Error::EndOfRows)
            }
            Err(e) => {
                self.cursor.in_set = false;
                self.cursor.failed = true;
                Err(e)
            }
        }
    }

    /// Discard unread rows. Safe to call more than once.
    pub async fn close(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.cursor.in_set {
            return Ok(());
        }
        self.cursor.in_set = false;
        if let Err(e) = cancel::run(cancel, self.source.discard(cancel)).await {
            self.cursor.failed = true;
            return Err(e);
        }
        Ok(())
    }
}

impl fmt::Debug for QueryStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStream")
            .field("schema", &self.schema)
            .field("active", &self.cursor.in_set)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

/// A fully-read result set.
///
/// Owns its rows, so it stays usable after the connection is gone.
#[derive(Debug)]
pub struct Buffer {
    schema: Arc<Schema>,
    rows: Vec<Row>,
    position: usize,
    bindings: Bindings,
}

impl Buffer {
    /// Create a buffer from rows sharing `schema`.
    #[must_use]
    pub fn new(schema: Arc<Schema>, rows: Vec<Row>) -> Self {
        Self {
            schema,
            rows,
            position: 0,
            bindings: Bindings::default(),
        }
    }

    /// Get the schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Get the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get a row by index.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Get all rows.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Iterate over the rows.
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Store column `name` of every scanned row into `dest`.
    pub fn prep<T: FromSql + Send + 'static>(&mut self, name: &str, dest: &Dest<T>) -> &mut Self {
        self.bindings.prep(ColumnRef::Name(name.to_string()), dest);
        self
    }

    /// Store column `index` of every scanned row into `dest`.
    pub fn prep_at<T: FromSql + Send + 'static>(&mut self, index: usize, dest: &Dest<T>) -> &mut Self {
        self.bindings.prep(ColumnRef::Index(index), dest);
        self
    }

    /// Step to the next row, filling prepared destinations.
    ///
    /// Returns [`Error::EndOfRows`] past the last row.
    pub fn scan(&mut self) -> Result<&Row> {
        let Some(row) = self.rows.get(self.position) else {
            return Err(Error::EndOfRows);
        };
        self.bindings.apply(&self.schema, row.values())?;
        self.position += 1;
        Ok(row)
    }

    /// Restart `scan` from the first row.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Consume the buffer, returning its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl<'b> IntoIterator for &'b Buffer {
    type Item = &'b Row;
    type IntoIter = std::slice::Iter<'b, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rdb_types::{SqlType, SqlValue};

    use super::*;
    use crate::param::{Output, Param, ParamSlot, bind};

    type Set = (Schema, VecDeque<Vec<SqlValue>>);

    struct VecSource {
        sets: VecDeque<Set>,
        current: Option<VecDeque<Vec<SqlValue>>>,
        outputs: Vec<(usize, SqlValue)>,
        fail_after_rows: Option<usize>,
        rows_read: usize,
    }

    #[async_trait]
    impl ResultSource for VecSource {
        async fn next_set(&mut self, _cancel: &CancellationToken) -> Result<Option<Schema>> {
            Ok(self.sets.pop_front().map(|(schema, rows)| {
                self.current = Some(rows);
                schema
            }))
        }

        async fn next_row(&mut self, _cancel: &CancellationToken) -> Result<Option<Vec<SqlValue>>> {
            if self.fail_after_rows == Some(self.rows_read) {
                return Err(Error::Backend("connection reset".into()));
            }
            let row = self.current.as_mut().and_then(VecDeque::pop_front);
            if row.is_some() {
                self.rows_read += 1;
            }
            Ok(row)
        }

        fn take_outputs(&mut self) -> Vec<(usize, SqlValue)> {
            std::mem::take(&mut self.outputs)
        }
    }

    fn ints(name: &str, values: &[i32]) -> Set {
        (
            Schema::from_pairs([(name, SqlType::Int)]),
            values.iter().map(|v| vec![SqlValue::Int(*v)]).collect(),
        )
    }

    fn source(sets: Vec<Set>) -> VecSource {
        VecSource {
            sets: sets.into(),
            current: None,
            outputs: Vec::new(),
            fail_after_rows: None,
            rows_read: 0,
        }
    }

    fn next(sets: Vec<Set>) -> Next<'static> {
        Next::new(Execution::new(Box::new(source(sets))), false)
    }

    #[derive(Clone, Default)]
    struct Counter {
        drained: Arc<AtomicUsize>,
        abandoned: Arc<AtomicUsize>,
    }

    impl Release for Counter {
        fn release(self: Box<Self>, drained: bool) {
            let counter = if drained { &self.drained } else { &self.abandoned };
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_sets_in_order_then_no_more_results() {
        let cancel = CancellationToken::new();
        let mut next = next(vec![ints("a", &[1, 2]), ints("b", &[3]), ints("c", &[])]);

        let mut seen = Vec::new();
        loop {
            let mut result = match next.result(&cancel).await {
                Ok(result) => result,
                Err(e) => {
                    assert!(matches!(e, Error::NoMoreResults));
                    break;
                }
            };
            while let Ok(row) = result.scan(&cancel).await {
                seen.push(row.get_at::<i32>(0).unwrap());
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(next.sets_read(), 3);
        assert!(matches!(next.result(&cancel).await, Err(Error::NoMoreResults)));
        assert!(matches!(next.buffer(&cancel).await, Err(Error::NoMoreResults)));
    }

    #[tokio::test]
    async fn test_advancing_discards_unread_rows() {
        let cancel = CancellationToken::new();
        let mut next = next(vec![ints("a", &[1, 2, 3]), ints("b", &[9])]);

        let mut first = next.result(&cancel).await.unwrap();
        assert_eq!(first.scan(&cancel).await.unwrap().get::<i32>("a").unwrap(), 1);

        let buffer = next.buffer(&cancel).await.unwrap();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.row(0).unwrap().get::<i32>("b").unwrap(), 9);
    }

    #[tokio::test]
    async fn test_scan_end_of_rows_repeats_and_close_is_idempotent() {
        let cancel = CancellationToken::new();
        let mut next = next(vec![ints("a", &[1])]);
        let mut result = next.result(&cancel).await.unwrap();
        result.scan(&cancel).await.unwrap();
        assert!(matches!(result.scan(&cancel).await, Err(Error::EndOfRows)));
        assert!(matches!(result.scan(&cancel).await, Err(Error::EndOfRows)));
        result.close(&cancel).await.unwrap();
        result.close(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_prep_fills_destinations() {
        let cancel = CancellationToken::new();
        let set = (
            Schema::from_pairs([("id", SqlType::Int), ("name", SqlType::Text)]),
            VecDeque::from([
                vec![SqlValue::Int(1), SqlValue::from("ann")],
                vec![SqlValue::Int(2), SqlValue::from("bob")],
            ]),
        );
        let mut next = next(vec![set]);
        let id = Dest::<i64>::new();
        let name = Dest::<String>::new();

        let mut result = next.result(&cancel).await.unwrap();
        result.prep("NAME", &name).prep_at(0, &id);
        let mut names = Vec::new();
        while result.scan(&cancel).await.is_ok() {
            names.push(name.get().unwrap());
        }
        assert_eq!(names, vec!["ann", "bob"]);
        assert_eq!(id.get(), Some(2));
    }

    #[tokio::test]
    async fn test_prep_unknown_column_reported_at_scan() {
        let cancel = CancellationToken::new();
        let mut next = next(vec![ints("a", &[1])]);
        let dest = Dest::<i32>::new();
        let mut result = next.result(&cancel).await.unwrap();
        result.prep("missing", &dest);
        assert!(matches!(
            result.scan(&cancel).await,
            Err(Error::UnknownColumn(_))
        ));
    }

    #[tokio::test]
    async fn test_buffer_scan_and_rewind() {
        let cancel = CancellationToken::new();
        let mut next = next(vec![ints("n", &[4, 5])]);
        let mut buffer = next.buffer(&cancel).await.unwrap();
        drop(next);

        let n = Dest::<i32>::new();
        buffer.prep("n", &n);
        buffer.scan().unwrap();
        assert_eq!(n.get(), Some(4));
        buffer.scan().unwrap();
        assert!(matches!(buffer.scan(), Err(Error::EndOfRows)));
        buffer.rewind();
        buffer.scan().unwrap();
        assert_eq!(n.get(), Some(4));
        assert_eq!(buffer.iter().count(), 2);
    }

    #[tokio::test]
    async fn test_outputs_published_after_last_set() {
        let cancel = CancellationToken::new();
        let total = Output::new();
        let slots = [ParamSlot::new("total").with_type(SqlType::Int)];
        let params = vec![
            Param::named("total", SqlValue::Null)
                .out(true)
                .with_output(&total),
        ];
        let bound = bind(&cancel, &slots, params, false).await.unwrap();

        let mut src = source(vec![ints("a", &[1])]);
        src.outputs = vec![(0, SqlValue::Int(42))];
        let execution = Execution::new(Box::new(src)).with_outputs(bound.outputs);
        let mut next = Next::new(execution, false);

        next.result(&cancel).await.unwrap();
        assert!(matches!(total.value(), Err(Error::OutputNotReady)));
        assert!(matches!(next.result(&cancel).await, Err(Error::NoMoreResults)));
        assert_eq!(total.get::<i32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_guard_released_once_when_drained() {
        let cancel = CancellationToken::new();
        let counter = Counter::default();
        let mut next = next(vec![ints("a", &[1])]).with_guard(counter.clone());
        next.buffer(&cancel).await.unwrap();
        assert!(next.result(&cancel).await.is_err());
        assert!(next.result(&cancel).await.is_err());
        drop(next);
        assert_eq!(counter.drained.load(Ordering::SeqCst), 1);
        assert_eq!(counter.abandoned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_guard_released_on_abandon() {
        let cancel = CancellationToken::new();
        let counter = Counter::default();
        let mut next = next(vec![ints("a", &[1]), ints("b", &[2])]).with_guard(counter.clone());
        next.result(&cancel).await.unwrap();
        drop(next);
        assert_eq!(counter.drained.load(Ordering::SeqCst), 0);
        assert_eq!(counter.abandoned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backend_error_during_scan_fails_cursor() {
        let cancel = CancellationToken::new();
        let counter = Counter::default();
        let mut src = source(vec![ints("a", &[1, 2]), ints("b", &[3])]);
        src.fail_after_rows = Some(1);
        let mut next = Next::new(Execution::new(Box::new(src)), false).with_guard(counter.clone());

        let mut result = next.result(&cancel).await.unwrap();
        result.scan(&cancel).await.unwrap();
        assert!(matches!(result.scan(&cancel).await, Err(Error::Backend(_))));
        assert!(matches!(next.result(&cancel).await, Err(Error::NoMoreResults)));
        assert_eq!(counter.abandoned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_result() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut next = next(vec![ints("a", &[1])]);
        assert!(matches!(next.result(&cancel).await, Err(Error::Cancelled)));
        assert!(next.is_done());
    }
}
