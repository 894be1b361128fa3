//! Method-name conventions of the server API.
//!
//! The server names its methods consistently enough that the result shape
//! can be read off the name: iterator openers start with `Reset…Iterator`
//! or `Find…`, async starters end in `Async` or start with `Request`, and
//! everything else returns its value directly.

/// What calling a method hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodShape {
    /// The result is in the reply itself.
    Plain,
    /// The reply carries an iterator id to drain and release.
    Iterator,
    /// The reply carries a `strRequestId` to poll.
    Async,
}

/// Classifies `method` (without the service prefix).
///
/// The async suffix wins over the iterator prefixes, so `FindHostsAsync`
/// is async.
pub fn classify(method: &str) -> MethodShape {
    if is_async(method) {
        MethodShape::Async
    } else if is_iterator(method) {
        MethodShape::Iterator
    } else {
        MethodShape::Plain
    }
}

fn is_async(method: &str) -> bool {
    method.ends_with("Async") || has_word_prefix(method, "Request")
}

fn is_iterator(method: &str) -> bool {
    if method == "GetTaskHistory" || has_word_prefix(method, "Find") {
        return true;
    }
    method
        .strip_prefix("Reset")
        .is_some_and(|rest| rest.contains("Iterator"))
}

/// `method` starts with `prefix` followed by another capitalised word.
fn has_word_prefix(method: &str, prefix: &str) -> bool {
    method
        .strip_prefix(prefix)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}

/// Data getter paired with an `…Async` method: `X` → `XGetData`.
pub fn data_getter_for(method: &str) -> Option<String> {
    method
        .ends_with("Async")
        .then(|| format!("{method}GetData"))
}

/// Canceller paired with an `…Async` method: `X` → `XCancel`.
pub fn canceller_for(method: &str) -> Option<String> {
    method.ends_with("Async").then(|| format!("{method}Cancel"))
}
