//! Data models for savesync

mod batch;
mod instruction;
mod player;
mod save_record;

pub use batch::{BatchPayload, SaveBatch, SessionBatchId, WeightClass};
pub use instruction::{PersistenceInstruction, SaveDelta, UpdateCategory};
pub use player::PlayerId;
pub use save_record::{SaveRecord, SaveRecordId};
