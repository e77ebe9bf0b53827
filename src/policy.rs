//! Pluggable file-growth sizing policies.
//!
//! Modeled after spec.md §9's note on `original_source/src/fs/iwexfile.c`'s
//! callback-with-opaque-context policy: "model as a polymorphic capability
//! with variants `{default, fibonacci(state), mul(n, dn), custom(fn, ctx)}` and
//! an explicit `deactivate` method invoked at close." Rust's ownership makes
//! the C sentinel call (`req == -1` frees the heap context) unnecessary — an
//! explicit [`ResizePolicy::deactivate`] plays the same lifecycle role without
//! the free-on-sentinel trick.

use crate::error::{Error, Result};

/// Read-only context passed to a resize policy on every call.
#[derive(Clone, Copy, Debug)]
pub struct PolicyContext {
    /// System page size; every policy result must be a multiple of this.
    pub page_size: u64,
    /// Configured maximum offset, or 0 if unbounded.
    pub max_offset: u64,
}

/// A pluggable file-growth policy: `(requested, current, ctx) -> next_size`.
///
/// Built-in variants mirror `original_source/src/fs/iwexfile.c`'s
/// `_exfile_default_szpolicy`, `iw_exfile_szpolicy_fibo`, and
/// `iw_exfile_szpolicy_mul`. [`ResizePolicy::Custom`] lets callers supply
/// their own closure, equivalent to the C API's `IW_EXT_RSPOLICY` function
/// pointer plus opaque context.
pub enum ResizePolicy {
    /// `next = round_up(requested, page_size)`.
    Default,
    /// Fibonacci-like growth: `next = round_up(max(requested, current + prev), page_size)`,
    /// then `prev <- current`.
    Fibonacci {
        /// Size of the file before the previous resize.
        prev_size: u64,
    },
    /// Rational-multiplier growth: `next = round_up(requested * n / dn, page_size)`.
    /// Falls back to [`ResizePolicy::Default`] (with a warning) if `dn == 0` or `n < dn`.
    RationalMultiplier {
        /// Numerator; must be >= `denominator`.
        numerator: u64,
        /// Denominator; must be nonzero.
        denominator: u64,
    },
    /// User-supplied policy function.
    Custom(Box<dyn FnMut(u64, u64, &PolicyContext) -> Result<u64> + Send>),
}

impl std::fmt::Debug for ResizePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResizePolicy::Default => f.write_str("ResizePolicy::Default"),
            ResizePolicy::Fibonacci { prev_size } => {
                f.debug_struct("ResizePolicy::Fibonacci").field("prev_size", prev_size).finish()
            }
            ResizePolicy::RationalMultiplier { numerator, denominator } => f
                .debug_struct("ResizePolicy::RationalMultiplier")
                .field("numerator", numerator)
                .field("denominator", denominator)
                .finish(),
            ResizePolicy::Custom(_) => f.write_str("ResizePolicy::Custom(..)"),
        }
    }
}

impl Default for ResizePolicy {
    fn default() -> Self {
        ResizePolicy::Default
    }
}

impl ResizePolicy {
    /// Computes the next file size for a growth request.
    ///
    /// Contract (spec.md §4.1): returning `next < requested`, or a `next` that
    /// isn't page-aligned, signals failure — the caller (`ensure_size`) turns
    /// that into [`Error::ResizePolicyFail`].
    pub fn next_size(&mut self, requested: u64, current: u64, ctx: &PolicyContext) -> Result<u64> {
        let next = match self {
            ResizePolicy::Default => round_up(requested, ctx.page_size),
            ResizePolicy::Fibonacci { prev_size } => {
                let candidate = current.saturating_add(*prev_size).max(requested);
                let rounded = round_up(candidate, ctx.page_size);
                *prev_size = current;
                rounded
            }
            ResizePolicy::RationalMultiplier { numerator, denominator } => {
                if *denominator == 0 || *numerator < *denominator {
                    tracing::warn!(
                        numerator = *numerator,
                        denominator = *denominator,
                        "invalid rational-multiplier resize policy context, \
                         falling back to the default resize policy"
                    );
                    round_up(requested, ctx.page_size)
                } else {
                    let scaled = (u128::from(requested) * u128::from(*numerator))
                        / u128::from(*denominator);
                    let scaled = u64::try_from(scaled).unwrap_or(u64::MAX);
                    round_up(scaled, ctx.page_size)
                }
            }
            ResizePolicy::Custom(f) => return f(requested, current, ctx),
        };
        Ok(next)
    }

    /// Deactivates the policy, releasing any accumulated state.
    ///
    /// Called once by [`crate::file::ExtendableFile::close`], playing the role
    /// of the original's sentinel `rspolicy(-1, ...)` call.
    pub fn deactivate(&mut self) {
        if let ResizePolicy::Fibonacci { prev_size } = self {
            *prev_size = 0;
        }
        tracing::debug!(policy = ?self, "resize policy deactivated");
    }
}

/// Rounds `value` up to the next multiple of `page_size` (`page_size` must be
/// a nonzero power of two; callers validate this at open).
#[must_use]
pub fn round_up(value: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return value;
    }
    let rem = value % page_size;
    if rem == 0 {
        value
    } else {
        value.saturating_add(page_size - rem)
    }
}

/// Rounds `value` down to the previous multiple of `page_size`.
#[must_use]
pub fn round_down(value: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return value;
    }
    value - (value % page_size)
}

/// Validates a resize policy's output against spec.md §4.1/§4.4's contract.
pub(crate) fn validate_policy_result(next: u64, requested: u64, page_size: u64) -> Result<u64> {
    if next < requested || next % page_size != 0 {
        return Err(Error::ResizePolicyFail(format!(
            "policy returned {next}, which is either smaller than the \
             requested {requested} or not a multiple of page size {page_size}"
        )));
    }
    Ok(next)
}
