use crate::cli::Args;

/// Size bounds for pages, batches and streaming runs.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub stream_max_rows: usize,
}

impl Limits {
    pub fn from_args(args: &Args) -> Self {
        let max_page_size = args.max_page_size.max(1);
        Self {
            default_page_size: args.default_page_size.clamp(1, max_page_size),
            max_page_size,
            stream_max_rows: args.stream_max_rows.max(1),
        }
    }

    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size)
            .max(1)
    }

    pub fn max_rows(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.stream_max_rows)
            .min(self.stream_max_rows)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            default_page_size: 100,
            max_page_size: 1000,
            stream_max_rows: 50_000,
        }
    }

    #[test]
    fn test_page_size_clamped() {
        let l = limits();
        assert_eq!(l.page_size(None), 100);
        assert_eq!(l.page_size(Some(0)), 1);
        assert_eq!(l.page_size(Some(5000)), 1000);
        assert_eq!(l.page_size(Some(20)), 20);
    }

    #[test]
    fn test_max_rows_clamped() {
        let l = limits();
        assert_eq!(l.max_rows(None), 50_000);
        assert_eq!(l.max_rows(Some(10)), 10);
        assert_eq!(l.max_rows(Some(10_000_000)), 50_000);
    }
}
