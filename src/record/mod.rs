mod error;
mod free_space;
mod layout;
mod store;

pub use error::{RecordError, RecordResult};
pub use free_space::{DEFAULT_FSM_MAX_ENTRIES, FreeSpaceManager};
pub use layout::{
    BlockInsert, BlockLayout, FreeSpaceEntry, RECORD_HEADER_SIZE, RecordId, SlotId,
    UNUSED_DICT_SLOT, UNUSED_NEXT_PTR,
};
pub use store::{
    CollectionHeader, DEFAULT_AVG_STR_LEN, DEFAULT_BLOCK_SIZE, DEFAULT_BUFFER_SLOTS, StoreConfig,
    StringStore,
};
