use crate::stdio::ClosedStdio;

/// Size of one bounded read; matches the atomic pipe write size on Linux.
pub const DEFAULT_CHUNK_BYTES: usize = 4096;

/// Allocation granularity of a pending record buffer.
pub const DEFAULT_PAGE_BYTES: usize = 4096;

/// What happens to an unterminated record still buffered when its source closes.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum TailPolicy {
    /// Emit the partial record followed by one synthetic delimiter.
    #[default]
    Terminate,
    /// Drop the partial record silently.
    Discard,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum Mode {
    /// Forward every chunk verbatim as soon as it is read.
    #[default]
    Raw,
    /// Buffer per source and only emit delimiter-terminated records.
    Delimited { delimiter: u8, tail: TailPolicy },
}

impl Mode {
    pub fn delimited(delimiter: u8) -> Self {
        Mode::Delimited {
            delimiter,
            tail: TailPolicy::Terminate,
        }
    }

    /// Sets the tail policy; raw mode has no tail and is returned unchanged.
    pub fn with_tail(self, tail: TailPolicy) -> Self {
        match self {
            Mode::Raw => Mode::Raw,
            Mode::Delimited { delimiter, .. } => Mode::Delimited { delimiter, tail },
        }
    }

    pub fn is_delimited(&self) -> bool {
        matches!(self, Mode::Delimited { .. })
    }
}

/// How a pending buffer picks its next capacity.
///
/// Capacities are always whole pages and never shrink short of a full release.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum GrowthPolicy {
    /// Smallest page multiple that holds the new length.
    #[default]
    PageExact,
    /// Page-rounded, and at least twice the previous capacity.
    Doubling,
}

impl GrowthPolicy {
    pub fn capacity_for(&self, required: usize, current: usize, page: usize) -> usize {
        let exact = round_to_page(required, page);
        match self {
            GrowthPolicy::PageExact => exact,
            GrowthPolicy::Doubling => exact.max(round_to_page(current.saturating_mul(2), page)),
        }
    }
}

fn round_to_page(len: usize, page: usize) -> usize {
    let page = page.max(1);
    len.div_ceil(page).saturating_mul(page)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MergeLimits {
    pub chunk_bytes: usize,
    pub page_bytes: usize,
}

impl Default for MergeLimits {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            page_bytes: DEFAULT_PAGE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct MergeConfig {
    pub mode: Mode,
    pub limits: MergeLimits,
    pub growth: GrowthPolicy,
    /// Standard descriptors that were closed at startup; never adopted as sources.
    pub closed_stdio: ClosedStdio,
}

impl MergeConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_exact_rounds_up_to_whole_pages() {
        let policy = GrowthPolicy::PageExact;
        assert_eq!(policy.capacity_for(1, 0, 4096), 4096);
        assert_eq!(policy.capacity_for(4096, 0, 4096), 4096);
        assert_eq!(policy.capacity_for(4097, 4096, 4096), 8192);
        assert_eq!(policy.capacity_for(0, 0, 4096), 0);
    }

    #[test]
    fn doubling_never_falls_below_the_exact_fit() {
        let policy = GrowthPolicy::Doubling;
        assert_eq!(policy.capacity_for(4097, 4096, 4096), 8192);
        assert_eq!(policy.capacity_for(8193, 8192, 4096), 16384);
        assert_eq!(policy.capacity_for(40_000, 8192, 4096), 40_960);
    }

    #[test]
    fn tail_policy_only_applies_to_delimited_mode() {
        assert_eq!(Mode::Raw.with_tail(TailPolicy::Discard), Mode::Raw);
        assert_eq!(
            Mode::delimited(b'\n').with_tail(TailPolicy::Discard),
            Mode::Delimited {
                delimiter: b'\n',
                tail: TailPolicy::Discard
            }
        );
    }
}
