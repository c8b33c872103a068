pub mod guard;
pub mod metrics;
pub mod providers;
pub mod relay;

pub use guard::{InFlightGuard, InFlightRegistry};
pub use relay::{GenerationSettings, RelayError, RelayOutcome, RelayService};
