pub mod log_sink;
pub mod path_utils;
