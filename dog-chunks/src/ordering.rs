use crate::types::file_name;

/// Index arithmetic shared by the sequencer, the manager and the CLI
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkOrdering;

impl ChunkOrdering {
    /// Parse the `<index>_` prefix of a chunk file name
    pub fn index_of(path: &str) -> Option<i64> {
        let name = file_name(path);
        let (prefix, _) = name.split_once('_')?;
        prefix.parse::<i64>().ok()
    }

    /// Sort chunk paths by numeric index; paths without an index prefix are dropped
    pub fn sort<I>(paths: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut indexed: Vec<(i64, String)> = paths
            .into_iter()
            .filter_map(|path| Self::index_of(&path).map(|index| (index, path)))
            .collect();
        indexed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        indexed.into_iter().map(|(_, path)| path).collect()
    }

    /// Position of `index` in a session that starts at `base`; `None` on overflow
    pub fn adjusted(index: i64, base: i64) -> Option<i64> {
        if base == 0 {
            Some(index)
        } else {
            index.checked_sub(base)
        }
    }

    /// Whether `index` is the next one to append to a folder holding `count` chunks
    pub fn is_next(count: usize, index: i64, base: i64) -> bool {
        match (i64::try_from(count), Self::adjusted(index, base)) {
            (Ok(count), Some(adjusted)) => count == adjusted,
            _ => false,
        }
    }

    /// Number of chunks an upload of `total_size` bytes is split into.
    ///
    /// Returns `None` when `chunk_size` is zero.
    pub fn last_index(total_size: u64, chunk_size: u64) -> Option<u64> {
        if chunk_size == 0 {
            return None;
        }
        if total_size < chunk_size {
            return Some(1);
        }
        Some(total_size / chunk_size + u64::from(total_size % chunk_size != 0))
    }

    /// `last` chunks counted from `base`; `None` when it does not fit an i64
    fn final_index(last: u64, base: i64) -> Option<i64> {
        let last = i64::try_from(last).ok()?;
        last.checked_add(base.checked_sub(1)?)
    }

    /// Whether `index` is the final index of the upload, in the `base` numbering.
    ///
    /// Returns `None` when `chunk_size` is zero.
    pub fn is_last(index: i64, total_size: u64, chunk_size: u64, base: i64) -> Option<bool> {
        let last = Self::last_index(total_size, chunk_size)?;
        Some(Self::final_index(last, base) == Some(index))
    }

    /// Whether `index` lies beyond the final index of the upload
    pub fn is_past_last(index: i64, total_size: u64, chunk_size: u64, base: i64) -> Option<bool> {
        let last = Self::last_index(total_size, chunk_size)?;
        Some(Self::final_index(last, base).map_or(false, |last| index > last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_prefix_is_numeric() {
        assert_eq!(ChunkOrdering::index_of("chunks/v/10_v.mp4"), Some(10));
        assert_eq!(ChunkOrdering::index_of("0_a"), Some(0));
        assert_eq!(ChunkOrdering::index_of("chunks/v/v.mp4"), None);
        assert_eq!(ChunkOrdering::index_of("x_v.mp4"), None);
    }

    #[test]
    fn sort_is_numeric_not_lexicographic() {
        let sorted = ChunkOrdering::sort(vec![
            "f/10_a.bin".to_string(),
            "f/2_a.bin".to_string(),
            "f/.DS_Store".to_string(),
            "f/1_a.bin".to_string(),
        ]);
        assert_eq!(sorted, vec!["f/1_a.bin", "f/2_a.bin", "f/10_a.bin"]);
    }

    #[test]
    fn next_index_accounts_for_base() {
        assert!(ChunkOrdering::is_next(0, 0, 0));
        assert!(ChunkOrdering::is_next(2, 2, 0));
        assert!(ChunkOrdering::is_next(0, 1, 1));
        assert!(ChunkOrdering::is_next(3, 4, 1));
        assert!(!ChunkOrdering::is_next(3, 3, 1));
        assert!(ChunkOrdering::is_next(1, -4, -5));
    }

    #[test]
    fn last_index_rounds_up() {
        assert_eq!(ChunkOrdering::last_index(4001, 2000), Some(3));
        assert_eq!(ChunkOrdering::last_index(4000, 2000), Some(2));
        assert_eq!(ChunkOrdering::last_index(2000, 2000), Some(1));
        assert_eq!(ChunkOrdering::last_index(10, 2000), Some(1));
        assert_eq!(ChunkOrdering::last_index(10, 0), None);
    }

    #[test]
    fn last_index_in_base_numbering() {
        assert_eq!(ChunkOrdering::is_last(2, 4001, 2000, 0), Some(true));
        assert_eq!(ChunkOrdering::is_last(1, 4001, 2000, 0), Some(false));
        assert_eq!(ChunkOrdering::is_last(1, 2000, 2000, 1), Some(true));
        assert_eq!(ChunkOrdering::is_last(3, 4001, 2000, 1), Some(true));
    }

    #[test]
    fn extreme_bases_never_overflow() {
        assert!(!ChunkOrdering::is_next(0, i64::MAX, -1));
        assert!(!ChunkOrdering::is_next(0, -2, i64::MAX));
        assert_eq!(ChunkOrdering::adjusted(i64::MIN, 1), None);
        assert_eq!(ChunkOrdering::is_last(0, 10, 1, i64::MIN), Some(false));
        assert_eq!(ChunkOrdering::is_last(i64::MAX, 10, 1, i64::MAX), Some(false));
        assert_eq!(ChunkOrdering::is_past_last(i64::MAX, 10, 1, i64::MAX), Some(false));
    }

    #[test]
    fn indexes_past_the_last_are_detected() {
        assert_eq!(ChunkOrdering::is_past_last(2, 4000, 2000, 0), Some(true));
        assert_eq!(ChunkOrdering::is_past_last(1, 4000, 2000, 0), Some(false));
        assert_eq!(ChunkOrdering::is_past_last(2, 4000, 2000, 1), Some(false));
        assert_eq!(ChunkOrdering::is_past_last(0, 4000, 0, 0), None);
    }
}
