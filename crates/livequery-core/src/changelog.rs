//! Persistent, append-only change log.
//!
//! Every committed mutation is recorded with a monotonically increasing
//! sequence number. The log is the source of truth for ordering: subscribers
//! compare sequences to drop stale signals, and clients use
//! [`ChangeLog::scan_batch`] to catch up after a gap.

use livequery_proto::change::ArchivedChangeRecord;
use livequery_proto::{ChangeRecord, NewChange};
use parking_lot::Mutex;
use sled::{Db, Tree};

use crate::error::Error;

/// Tree name for change records.
const CHANGELOG_TREE: &str = "livequery:changelog";

/// Change log backed by sled.
///
/// Records are keyed by their sequence (big-endian, so sled iterates in
/// sequence order) and encoded with rkyv.
pub struct ChangeLog {
    tree: Tree,
    /// Highest assigned sequence. Held across the insert so a failed write
    /// does not burn a sequence and inserts land in sequence order.
    last_sequence: Mutex<u64>,
}

impl ChangeLog {
    /// Open or create the change log in the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let tree = db.open_tree(CHANGELOG_TREE)?;
        let last_sequence = Self::load_last_sequence(&tree)?;

        tracing::debug!(last_sequence, "change log opened");

        Ok(Self {
            tree,
            last_sequence: Mutex::new(last_sequence),
        })
    }

    fn load_last_sequence(tree: &Tree) -> Result<u64, Error> {
        if let Some((key, _)) = tree.last()? {
            if let Ok(bytes) = <[u8; 8]>::try_from(key.as_ref()) {
                return Ok(u64::from_be_bytes(bytes));
            }
        }
        Ok(0)
    }

    /// Persist a change and return the stored record.
    ///
    /// Call only after the underlying mutation has committed, otherwise a
    /// subscriber may re-fetch before the new data is visible.
    pub fn append(&self, change: NewChange) -> Result<ChangeRecord, Error> {
        let mut last = self.last_sequence.lock();
        let sequence = *last + 1;
        let record = ChangeRecord::from_new(change, sequence);

        let value = rkyv::to_bytes::<rkyv::rancor::Error>(&record)
            .map_err(|e| Error::Append(e.to_string()))?;
        self.tree
            .insert(sequence.to_be_bytes(), value.as_slice())
            .map_err(|e| Error::Append(e.to_string()))?;

        *last = sequence;
        drop(last);

        tracing::trace!(
            sequence,
            resource = %record.resource,
            operation = record.operation.as_str(),
            "change appended"
        );

        Ok(record)
    }

    /// Highest assigned sequence, 0 when nothing was ever appended.
    pub fn current_sequence(&self) -> u64 {
        *self.last_sequence.lock()
    }

    /// Get a record by sequence.
    pub fn get(&self, sequence: u64) -> Result<Option<ChangeRecord>, Error> {
        match self.tree.get(sequence.to_be_bytes())? {
            Some(value) => Ok(Some(Self::decode(&value)?)),
            None => Ok(None),
        }
    }

    /// Iterate records starting at `from` (inclusive) in sequence order.
    pub fn scan_from(&self, from: u64) -> impl Iterator<Item = Result<ChangeRecord, Error>> + '_ {
        self.tree.range(from.to_be_bytes()..).map(|result| {
            let (_, value) = result?;
            Self::decode(&value)
        })
    }

    /// Read up to `batch_size` records from `from`, optionally restricted to
    /// some resources. Returns the records and whether more remain.
    pub fn scan_batch(
        &self,
        from: u64,
        batch_size: usize,
        resources: Option<&[String]>,
    ) -> Result<(Vec<ChangeRecord>, bool), Error> {
        let mut records = Vec::with_capacity(batch_size.min(1000));
        let mut has_more = false;

        for result in self.scan_from(from) {
            let record = result?;
            if let Some(filter) = resources {
                if !filter.iter().any(|r| r == &record.resource) {
                    continue;
                }
            }
            if records.len() >= batch_size {
                has_more = true;
                break;
            }
            records.push(record);
        }

        Ok((records, has_more))
    }

    /// Remove records with a sequence below `before`. Used by retention jobs.
    ///
    /// Returns the number of records removed.
    pub fn truncate_before(&self, before: u64) -> Result<u64, Error> {
        let mut removed = 0u64;
        for result in self.tree.range(..before.to_be_bytes()) {
            let (key, _) = result?;
            self.tree.remove(key)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<ChangeRecord, Error> {
        // sled values carry no alignment guarantee
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);

        let archived = rkyv::access::<ArchivedChangeRecord, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        rkyv::deserialize::<ChangeRecord, rkyv::rancor::Error>(archived)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
