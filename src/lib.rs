pub mod container;
pub mod file;
pub mod record;

pub use container::{
    ContainerError, ContainerResult, DEFAULT_MAX_CHAR, DEFAULT_MAX_LINE_LEN, DELETED_STRING_ID,
    DiskContainer, FilterKind, FilterStats, FilterType, GramMeasure, MemoryContainer, PhysOrd,
    StatsCollector, StringContainer, StringId, charsum,
};
pub use file::{BlockFile, BlockId, BufferManager, FileError, FileResult};
pub use record::{
    BlockLayout, CollectionHeader, DEFAULT_AVG_STR_LEN, DEFAULT_BLOCK_SIZE, DEFAULT_BUFFER_SLOTS,
    FreeSpaceManager, RecordError, RecordId, RecordResult, StoreConfig, StringStore,
};
