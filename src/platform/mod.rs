// Platform-specific code module

pub mod process_control;

pub use process_control::apply as apply_process_action;
