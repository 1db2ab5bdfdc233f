//! Result-window planning.
//!
//! Every page carries the full clause set; pages differ only in the
//! `from`/`to` window they ask the endpoint for.

/// Maximum number of clauses answered per request window.
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub from: usize,
    pub to: usize,
}

impl Page {
    pub fn count(&self) -> usize {
        self.to - self.from + 1
    }

    /// Value of the `resources` request header.
    pub fn resources(&self) -> String {
        format!("{}-{}", self.from, self.to)
    }
}

/// `ceil(clause_count / page_size)` consecutive windows. Zero clauses plan
/// zero pages. A page size of zero is treated as one.
pub fn plan(clause_count: usize, page_size: usize) -> Vec<Page> {
    let size = page_size.max(1);
    (0..clause_count.div_ceil(size))
        .map(|index| Page {
            index,
            from: index * size,
            to: (index + 1) * size - 1,
        })
        .collect()
}
