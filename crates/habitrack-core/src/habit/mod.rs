mod engine;
mod interval;
mod record;
mod store;

pub use engine::{CheckOff, LifecycleEngine, Reactivation};
pub use interval::IntervalKind;
pub use record::{ActiveHabitRecord, Expected, HabitStatus, NewActiveHabit};
pub use store::{Directory, HabitStore, MemoryStore};

#[cfg(test)]
pub(crate) use store::testing::FaultyStore;
