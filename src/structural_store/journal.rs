//! Epoch journal and crash recovery.
//!
//! `epoch_journal` holds at most one row: the epoch currently being
//! published, if any. Its presence (and its `lexical_committed` flag) on
//! open tells the coordinator exactly how far a prior publication got
//! before the process died, without needing any other out-of-band state.

use super::StructuralStore;
use crate::error::CodePlaneResult;

/// What the coordinator must do to reconcile state left by a prior run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// No journal row. Nothing to do; WAL recovery (if any) already
    /// brought the structural store back to its last committed state.
    Clean,
    /// A publication had started but the lexical commit never happened
    /// (or its completion was never recorded). The structural store was
    /// never touched for this epoch, so nothing there needs undoing;
    /// any lexical segment staged for this epoch is simply orphaned and
    /// will never be made visible because it was never committed.
    LexicalPendingDiscarded {
        /// The epoch that was abandoned.
        epoch_id: i64,
    },
    /// The lexical commit completed but the matching structural commit
    /// (the `epochs` row and fact writes) never happened. The lexical
    /// store now knows about files the structural store does not; it
    /// must be rolled back to agree with the structural store's last
    /// known-good file set.
    LexicalRolledBack {
        /// The epoch that was abandoned.
        epoch_id: i64,
        /// Every path the structural store considers present. The
        /// lexical store should retain only these.
        present_paths: Vec<String>,
    },
}

impl StructuralStore {
    /// Inspect the journal and decide what, if anything, must be
    /// reconciled. Always leaves the journal clean (no row) on return.
    pub fn recover(&self) -> CodePlaneResult<RecoveryAction> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT epoch_id, lexical_committed FROM epoch_journal LIMIT 1",
                [],
                |row| {
                    let epoch_id: i64 = row.get(0)?;
                    let lexical_committed: i64 = row.get(1)?;
                    Ok((epoch_id, lexical_committed != 0))
                },
            )
            .ok()
        };

        let Some((epoch_id, lexical_committed)) = row else {
            return Ok(RecoveryAction::Clean);
        };

        if !lexical_committed {
            self.clear_epoch_journal(epoch_id)?;
            return Ok(RecoveryAction::LexicalPendingDiscarded { epoch_id });
        }

        let epoch_recorded = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT 1 FROM epochs WHERE epoch_id = ?1",
                [epoch_id],
                |_| Ok(()),
            )
            .is_ok()
        };

        self.clear_epoch_journal(epoch_id)?;

        if epoch_recorded {
            return Ok(RecoveryAction::Clean);
        }

        let present_paths = self.present_paths()?;
        Ok(RecoveryAction::LexicalRolledBack { epoch_id, present_paths })
    }

    /// Step 2 of publication: write the journal row and force it durable.
    /// `synchronous = FULL` is set only for this write; the store reverts
    /// to `NORMAL` immediately after, matching the protocol's requirement
    /// that only the journal transitions be fsynced, not every batch write.
    pub fn begin_epoch_journal(&self, epoch_id: i64, started_at: i64) -> CodePlaneResult<()> {
        self.with_retry(|| {
            let conn = self.conn.lock();
            conn.pragma_update(None, "synchronous", "FULL")?;
            conn.execute(
                "INSERT INTO epoch_journal (epoch_id, lexical_committed, started_at) VALUES (?1, 0, ?2)",
                rusqlite::params![epoch_id, started_at],
            )?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(())
        })
    }

    /// Step 4: record that the lexical commit completed, durably.
    pub fn mark_lexical_committed(&self, epoch_id: i64) -> CodePlaneResult<()> {
        self.with_retry(|| {
            let conn = self.conn.lock();
            conn.pragma_update(None, "synchronous", "FULL")?;
            conn.execute(
                "UPDATE epoch_journal SET lexical_committed = 1 WHERE epoch_id = ?1",
                rusqlite::params![epoch_id],
            )?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(())
        })
    }

    /// Step 7: drop the journal row once the epoch is fully published.
    /// Not required to be durable -- if the process dies before this
    /// reaches disk, the next open finds `lexical_committed = 1` and an
    /// `epochs` row present, which `recover` treats as `Clean`.
    pub fn clear_epoch_journal(&self, epoch_id: i64) -> CodePlaneResult<()> {
        self.with_retry(|| {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM epoch_journal WHERE epoch_id = ?1", rusqlite::params![epoch_id])?;
            Ok(())
        })
    }
}
