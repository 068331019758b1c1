pub mod loader;
pub mod records;
pub mod types;

pub use loader::{CandleLoader, LoaderError, EXPECTED_COLUMNS};
pub use records::{Direction, Horizon, Outcome, RegimeRecord, UnknownHorizon, ENGINE_VERSION};
pub use types::{closes, Candle, CohortBoundary, CohortConfig};
