/// What to do when a link or reference invariant is found broken.
///
/// These are caller bugs, never recoverable errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertPolicy {
    /// Panic on the spot.
    Panic,
    /// Log a warning, count it, and carry on.
    Log,
}

impl Default for AssertPolicy {
    fn default() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(debug_assertions)] {
                Self::Panic
            } else {
                Self::Log
            }
        }
    }
}

/// Configuration of a [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceCoreConfig {
    /// Reaction to broken invariants.
    pub assert_policy: AssertPolicy,
    /// Upper bound on live link objects, `None` for unbounded.
    pub max_links: Option<usize>,
}

/// The implemention for DeviceCoreConfig
impl DeviceCoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the assertion policy.
    pub fn with_assert_policy(mut self, policy: AssertPolicy) -> Self {
        self.assert_policy = policy;
        self
    }

    /// Bounds the number of live links.
    pub fn with_max_links(mut self, max: usize) -> Self {
        self.max_links = Some(max);
        self
    }
}
