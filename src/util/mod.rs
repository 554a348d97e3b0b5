pub mod transpose;

/// Splits `0..n` into `parts` contiguous ranges whose lengths differ by at most one.
pub fn split_range_equally(n: usize, parts: usize) -> Vec<std::ops::Range<usize>> {
    let parts = parts.max(1);
    let base = n / parts;
    let rem = n % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let len = base + usize::from(i < rem);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::split_range_equally;

    #[test]
    fn ranges_cover_everything_in_order() {
        let ranges = split_range_equally(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        let ranges = split_range_equally(2, 4);
        assert_eq!(ranges, vec![0..1, 1..2, 2..2, 2..2]);
        assert_eq!(split_range_equally(5, 0), vec![0..5]);
    }
}
