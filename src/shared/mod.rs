//! Types shared between window tracking and the triggers

pub mod window_state;
