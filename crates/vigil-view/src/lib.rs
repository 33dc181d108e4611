pub mod filter;
pub mod rows;
pub mod sort;

pub use filter::*;
pub use rows::*;
pub use sort::*;

#[cfg(test)]
mod tests {
    use super::{sort_rows, FilterError, IssueRow, PrFilter, RunFilter, RunRow};
    use std::any::TypeId;
    use vigil_core::SortKey;

    #[test]
    fn crate_root_reexports_view_types() {
        let _ = TypeId::of::<RunRow>();
        let _ = TypeId::of::<IssueRow>();
        let _ = TypeId::of::<FilterError>();
        assert_eq!(RunFilter::default().pr, PrFilter::All);
        let mut rows: Vec<RunRow> = Vec::new();
        sort_rows(&mut rows, SortKey::Status);
        assert!(rows.is_empty());
    }
}
