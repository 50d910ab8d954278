use std::error::Error;

/// Alias for boxed errors that can be sent across threads.
///
/// Used at trait object boundaries, where the concrete error type of a
/// layer is not known.
pub type BoxedError = Box<dyn Error + Send + Sync>;
