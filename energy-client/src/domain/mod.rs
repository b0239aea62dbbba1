pub mod anomaly;
pub mod consumption;
pub mod timestamp;
pub mod user;

pub use anomaly::{Anomaly, AnomalyFilter, AnomalyStats, ConfirmationStatus, NewAnomaly, RegionCount};
pub use consumption::{
    ConsumptionReading, ConsumptionStats, NewReading, ReadingFilter, ReadingPatch, RegionSummary,
};
pub use user::{NewUser, User};
