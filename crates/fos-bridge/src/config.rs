//! Session Configuration

/// Session configuration options
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Heap limit for the engine runtime (bytes)
    pub memory_limit: Option<usize>,

    /// Native stack limit for script execution (bytes)
    pub max_stack_size: Option<usize>,

    /// Allocation volume that triggers a collection (bytes)
    pub gc_threshold: Option<usize>,

    /// Evaluate sources in strict mode.
    ///
    /// Off by default: in strict code a rejected proxy write throws a
    /// `TypeError` instead of failing silently.
    pub strict: bool,

    /// Install `console.*` and `print`, routed to tracing
    pub console: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            memory_limit: Some(32 * 1024 * 1024), // 32MB
            max_stack_size: None,
            gc_threshold: None,
            strict: false,
            console: true,
        }
    }
}

impl SessionConfig {
    /// Configuration with no limits and no helpers installed
    pub fn bare() -> Self {
        Self {
            memory_limit: None,
            console: false,
            ..Self::default()
        }
    }
}
