pub mod driver;
pub mod manager;

pub use driver::{
    CancelToken, ConnectProperties, ConnectRequest, Connection, Driver, DriverVersion,
};
pub use manager::DriverManager;
