pub mod list_set;

pub use list_set::{ListIter, ListSet, SlotId};
