#![forbid(unsafe_code)]

//! `after`-key position rules.
//!
//! An `after` key names the element that should immediately precede the
//! affected one. `None` always means "front". The two engines differ only in
//! how they treat an `after` key they cannot find:
//!
//! | Policy | `None` | known key `k` at `i` | unknown key |
//! |--------|--------|----------------------|-------------|
//! | [`AfterKeyPolicy::Strict`] | 0 | `i + 1` | [`KeyjoinError::KeyNotFound`] |
//! | [`AfterKeyPolicy::Lenient`] | 0 | `i + 1` | 0 |
//!
//! The ordered mirror is strict: an unknown key means it diverged from its
//! source. The join engine is lenient.

use crate::error::{KeyjoinError, Result};

/// How an unknown `after` key is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AfterKeyPolicy {
    /// Unknown keys are a divergence error.
    #[default]
    Strict,
    /// Unknown keys resolve to the front.
    Lenient,
}

impl AfterKeyPolicy {
    /// Index at which an element placed after `after` lands.
    ///
    /// `keys` is the current order, without the element being placed. `op`
    /// labels the error for strict failures.
    pub fn insertion_index<'a, I>(self, keys: I, after: Option<&str>, op: &'static str) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Some(after) = after else {
            return Ok(0);
        };
        match position_of(keys, after) {
            Some(index) => Ok(index + 1),
            None => match self {
                Self::Strict => Err(KeyjoinError::KeyNotFound {
                    key: after.to_owned(),
                    op,
                }),
                Self::Lenient => Ok(0),
            },
        }
    }
}

/// Position of `key` in `keys`.
pub fn position_of<'a, I>(keys: I, key: &str) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    keys.into_iter().position(|k| k == key)
}

/// The `after` key that reproduces position `index` in `keys`.
///
/// `None` for the front (or an empty sequence).
pub fn after_key_for<'a, I>(keys: I, index: usize) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    if index == 0 {
        return None;
    }
    keys.into_iter().nth(index - 1)
}
