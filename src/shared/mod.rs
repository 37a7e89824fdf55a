pub mod clock;
pub mod errors;
pub mod front_matter;
pub mod fs_atomic;
pub mod ids;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{RuntimeError, StoreError};
pub use logging::EventLog;
