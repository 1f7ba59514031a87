pub mod data;
pub mod io;
pub mod printing;


pub use data::Config;
pub use io::ConfigError;
