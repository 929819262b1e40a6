use crate::backend::Record;
use chrono::Utc;
use std::fmt::{self, Debug};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Picks the partition for a message key: 32-bit FNV-1a modulo the
/// partition count, the same scheme hash-balanced Kafka writers use.
pub fn partition_for_key(key: &[u8], partitions: i32) -> i32 {
    if partitions <= 1 {
        return 0;
    }
    let hash = key.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    });
    (hash % partitions as u32) as i32
}

/// Append-only partitioned log of one topic.
pub(crate) struct TopicLog {
    name: String,
    partitions: Vec<Vec<Record>>,
    next_partition: usize,
}

impl Debug for TopicLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicLog")
            .field("name", &self.name)
            .field(
                "partitions",
                &self.partitions.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TopicLog {
    pub(crate) fn new(name: &str, partitions: i32) -> Self {
        Self {
            name: name.to_string(),
            partitions: (0..partitions.max(1)).map(|_| Vec::new()).collect(),
            next_partition: 0,
        }
    }

    pub(crate) fn partition_count(&self) -> i32 {
        self.partitions.len() as i32
    }

    /// Appends a message and returns its partition and offset.
    ///
    /// Keyed messages go to the key's partition; unkeyed ones are spread
    /// round-robin.
    pub(crate) fn append(&mut self, key: Option<&str>, value: Vec<u8>) -> (i32, i64) {
        let partition = match key {
            Some(key) => partition_for_key(key.as_bytes(), self.partition_count()),
            None => {
                let partition = self.next_partition % self.partitions.len();
                self.next_partition = self.next_partition.wrapping_add(1);
                partition as i32
            }
        };

        let log = &mut self.partitions[partition as usize];
        let offset = log.len() as i64;
        log.push(Record {
            topic: self.name.clone(),
            partition,
            offset,
            key: key.map(str::to_string),
            value,
            timestamp: Utc::now(),
        });
        (partition, offset)
    }

    pub(crate) fn read(&self, partition: i32, offset: i64) -> Option<Record> {
        if offset < 0 {
            return None;
        }
        self.partitions
            .get(usize::try_from(partition).ok()?)?
            .get(offset as usize)
            .cloned()
    }

    /// Offset the next message appended to `partition` will get.
    pub(crate) fn end_offset(&self, partition: i32) -> Option<i64> {
        self.partitions
            .get(usize::try_from(partition).ok()?)
            .map(|log| log.len() as i64)
    }
}
