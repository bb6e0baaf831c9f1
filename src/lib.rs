pub mod buffer;
pub mod context;
pub mod diffview;
pub mod error;
pub mod host;
pub mod range_edit;
pub mod script;
pub mod timers;
