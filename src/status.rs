use core::fmt;

/// Outcome of a container or arena operation.
///
/// Every component in this crate reports through the same enumeration and
/// never panics on an operational failure: callers decide how to react.
/// `NullPointer` and `DoubleFree` flag caller bugs that the arena was able
/// to detect; both leave the arena unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Status {
    /// The operation completed.
    Success,
    /// The operation could not complete (e.g. allocation failed).
    Failure,
    /// Pop/read found no item.
    Empty,
    /// A null pointer was handed to `deallocate`.
    NullPointer,
    /// The slot was already on the free list.
    DoubleFree,
    /// The selected variant does not support this operation.
    NotImplemented,
    /// A timed wait expired.
    Timeout,
    /// A wait ended because the event was signaled (or spuriously).
    Signaled,
}

impl Status {
    /// Returns true for [`Status::Success`].
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Empty => "empty",
            Status::NullPointer => "null pointer",
            Status::DoubleFree => "double free",
            Status::NotImplemented => "not implemented",
            Status::Timeout => "timeout",
            Status::Signaled => "signaled",
        };
        f.write_str(s)
    }
}
