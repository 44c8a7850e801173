//! Session runtime state
//!
//! State that lives only as long as the scanning session: the editable text
//! tied to the current image.

pub mod buffer;

pub use buffer::CorrectionBuffer;
