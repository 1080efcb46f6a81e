pub mod members;
pub mod processor;
pub mod recurring;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testutil;

pub use members::{MemberRegistry, RegistryError};
pub use processor::{BookingError, BookingInput, BookingProcessor};
pub use recurring::{LessonExpander, SeriesError};
pub use scheduler::{AutoChargeScheduler, ChargePolicy, ScheduleError};
