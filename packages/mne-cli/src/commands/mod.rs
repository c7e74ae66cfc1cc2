pub mod average;
pub mod browse_raw;
pub mod check_versions;
pub mod filter;
pub mod find_events;
pub mod info;
pub mod process_raw;
