pub mod schedule;
pub mod schedule_index;
pub mod store;

pub use schedule::{NoScheduleReferences, ScheduleReferences, ScheduleService};
pub use schedule_index::ScheduleIndex;
pub use store::{InMemoryScheduleStore, ScheduleStore, SupabaseScheduleStore};
