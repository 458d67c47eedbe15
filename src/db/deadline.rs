use std::time::{Duration, Instant};

use rusqlite::Connection;

/// Per-statement timeout guard.
///
/// Installs a progress handler that interrupts the connection once the
/// deadline passes; the interrupted statement fails with a backend error.
/// The handler is cleared when the guard drops.
pub(crate) struct StatementDeadline<'conn> {
    conn: &'conn Connection,
}

// Check roughly every few thousand VM ops; cheap enough to leave on for
// every statement.
const PROGRESS_OP_INTERVAL: i32 = 4096;

impl<'conn> StatementDeadline<'conn> {
    pub(crate) fn install(conn: &'conn Connection, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        conn.progress_handler(
            PROGRESS_OP_INTERVAL,
            Some(move || Instant::now() >= deadline),
        );
        StatementDeadline { conn }
    }
}

impl Drop for StatementDeadline<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}
