pub mod consumption;

pub use consumption::ConsumptionSink;
