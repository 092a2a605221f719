//! # Utility Functions Module
//!
//! Small helpers for building engine command lines without repetitive
//! `.to_string()` calls.

/// Converts any iterable of string-like items to `Vec<String>`.
///
/// # Example
/// ```rust
/// use media_offload::utils::to_string_vec;
///
/// let crf = 28;
/// let args = to_string_vec(["-crf", &crf.to_string(), "-preset", "veryfast"]);
/// assert_eq!(args[1], "28");
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Build an argument vector from heterogeneous displayable items.
///
/// # Example
/// ```rust
/// use media_offload::args;
///
/// let crf = 32;
/// let args = args!["-c:v", "libx264", "-crf", crf];
/// assert_eq!(args, vec!["-c:v", "libx264", "-crf", "32"]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        $crate::utils::to_string_vec::<&dyn ::std::fmt::Display, _>([$(&$item as &dyn ::std::fmt::Display),*])
    };
}
