pub mod codec;
pub mod pattern;
pub mod timetag;
pub mod types;
