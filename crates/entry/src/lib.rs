pub mod normalize;
pub mod schema;

pub use normalize::{Normalizer, RejectReason, SlotPolicy};
pub use schema::{
    DiaryEntry, HappinessAnalysis, MAX_ITEM_CHARS, SLOT_COUNT, is_valid_date, truncate_chars,
};
