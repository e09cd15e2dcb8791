pub mod logging;

pub use logging::{file_layer, init_logging, log_file_name, LogHandle};
