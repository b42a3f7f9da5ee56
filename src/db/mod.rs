pub mod connection;
pub mod schema;
pub mod scans;
pub mod devices;
pub mod sources;
pub mod rankings;
pub mod schedules;

pub use connection::Database;
