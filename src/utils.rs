//! Small helpers shared by the binding and pipeline layers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Maximum number of warnings emitted through [`throw_warning`].
pub const MAX_WARNINGS: usize = 100;

static WARNING_COUNT: AtomicUsize = AtomicUsize::new(0);
static UID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Emits a rate-limited warning.
///
/// Render loops can hit the same soft failure every frame, so only the first
/// [`MAX_WARNINGS`] messages are forwarded to [`log::warn!`]. The next call
/// logs a single muting notice and everything after that is dropped.
///
/// Returns `true` if the message was actually logged.
pub fn throw_warning(message: impl AsRef<str>) -> bool {
    let count = WARNING_COUNT.fetch_add(1, Ordering::Relaxed);

    if count < MAX_WARNINGS {
        log::warn!("{}", message.as_ref());
        true
    } else {
        if count == MAX_WARNINGS {
            log::warn!("curtains: too many warnings thrown, muting further warnings");
        }
        false
    }
}

/// Number of warnings requested so far, muted ones included.
pub fn warning_count() -> usize {
    WARNING_COUNT.load(Ordering::Relaxed)
}

/// Returns a process-unique identifier.
///
/// Used as the consumer key of shared buffers and as the identity of bind
/// groups and pipeline entries.
pub fn generate_uid() -> u64 {
    UID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Converts `"some label-text"` or `"Some Label"` to `"someLabelText"`.
pub fn to_camel_case(s: &str) -> String {
    let pascal = to_pascal_case(s);
    let mut chars = pascal.chars();

    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Converts `"some label-text"` to `"SomeLabelText"`.
///
/// Already camel-cased words keep their inner capitals.
pub fn to_pascal_case(s: &str) -> String {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Rounds `value` up to the next multiple of `align`.
pub fn align_to(value: usize, align: usize) -> usize {
    if align == 0 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_and_pascal_case() {
        assert_eq!(to_camel_case("Camera"), "camera");
        assert_eq!(to_camel_case("my uniforms"), "myUniforms");
        assert_eq!(to_camel_case("model-view matrix"), "modelViewMatrix");
        assert_eq!(to_camel_case("modelViewMatrix"), "modelViewMatrix");
        assert_eq!(to_pascal_case("my uniforms"), "MyUniforms");
        assert_eq!(to_pascal_case("matrices"), "Matrices");
        assert_eq!(to_camel_case(""), "");
    }

    #[test]
    fn align_rounds_up() {
        assert_eq!(align_to(0, 16), 0);
        assert_eq!(align_to(1, 16), 16);
        assert_eq!(align_to(12, 4), 12);
        assert_eq!(align_to(13, 8), 16);
    }

    #[test]
    fn warnings_are_muted_after_cap() {
        for i in 0..MAX_WARNINGS + 10 {
            throw_warning(format!("warning {}", i));
        }

        assert!(warning_count() > MAX_WARNINGS);
        assert!(!throw_warning("still muted"));
    }

    #[test]
    fn uids_are_unique() {
        let a = generate_uid();
        let b = generate_uid();
        assert_ne!(a, b);
    }
}
