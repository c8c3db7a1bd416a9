/// Table filenames encode the closed update-index range they cover as two
/// 12-hex-digit, zero-padded numbers: `MMMMMMMMMMMM-NNNNNNNNNNNN.ref`.
pub fn table_file_name(min_update_index: u64, max_update_index: u64) -> String {
    format!("{min_update_index:012x}-{max_update_index:012x}.ref")
}

pub fn parse_table_range(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(".ref")?;
    let (min, max) = stem.split_once('-')?;
    if min.len() != 12 || max.len() != 12 {
        return None;
    }
    let min = u64::from_str_radix(min, 16).ok()?;
    let max = u64::from_str_radix(max, 16).ok()?;
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let name = table_file_name(1, 4);
        assert_eq!(name, "000000000001-000000000004.ref");
        assert_eq!(parse_table_range(&name), Some((1, 4)));
    }

    #[test]
    fn rejects_non_table_names() {
        assert_eq!(parse_table_range("manifest"), None);
        assert_eq!(parse_table_range("not-hex-zzzzzzzzzzzz.ref"), None);
    }
}
