//! Historical sync from the remote archive.

mod archive;
mod copy;
mod merge;
mod orchestrator;

pub use archive::{list_partitions, ArchiveLister, AwsCliLister, ListPage};
pub use copy::{AwsCliCopy, BulkCopy};
pub use merge::{parse_partition_dir, write_partition_table, ParsedPartition};
pub use orchestrator::{SyncOrchestrator, SyncSummary};
