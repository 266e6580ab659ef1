//! Pull-based row streaming

use super::bundle::Row;
use super::lock::TableLockGuard;
use super::progress::ProgressContext;
use super::services::ValueStream;
use super::status::TableStatus;
use crate::error::Result;

/// Rows of a running query. The table lock, if any, is held until the
/// stream is exhausted or dropped.
pub struct RowStream<'a> {
    values: ValueStream<'a>,
    row_columns: &'a [String],
    ctx: &'a ProgressContext,
    status: TableStatus,
    lock: Option<TableLockGuard>,
    done: bool,
}

impl<'a> RowStream<'a> {
    pub(crate) fn new(
        values: ValueStream<'a>,
        row_columns: &'a [String],
        ctx: &'a ProgressContext,
        status: TableStatus,
        lock: Option<TableLockGuard>,
    ) -> Self {
        Self {
            values,
            row_columns,
            ctx,
            status,
            lock,
            done: false,
        }
    }

    /// Status of the table when the stream was opened
    pub fn status(&self) -> &TableStatus {
        &self.status
    }

    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    fn finish(&mut self) {
        self.done = true;
        self.lock = None;
    }
}

impl Iterator for RowStream<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(e) = self.ctx.progress() {
            self.finish();
            return Some(Err(e));
        }
        match self.values.next() {
            Some(Ok(values)) => {
                let row = Row::from_values(self.row_columns, values);
                if row.is_err() {
                    self.finish();
                }
                Some(row)
            }
            Some(Err(e)) => {
                self.finish();
                Some(Err(e))
            }
            None => {
                self.finish();
                None
            }
        }
    }
}

impl std::fmt::Debug for RowStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("table_id", &self.status.table_id)
            .field("holds_lock", &self.lock.is_some())
            .field("done", &self.done)
            .finish()
    }
}
