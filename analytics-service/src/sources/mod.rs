pub mod consumption_csv_file;
pub mod consumption_ndjson_file;
pub mod simulated_meter;

pub use consumption_csv_file::ConsumptionCsvFileSource;
pub use consumption_ndjson_file::ConsumptionNdjsonFileSource;
pub use simulated_meter::SimulatedMeterSource;
