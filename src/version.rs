//! Version Codec
//!
//! Maps a logical row key to the physical row key of one of its versions.
//!
//! Versions start at [`STARTING_VERSION`] and decrease by one on every write,
//! and are rendered with a fixed width. Because replicas return range queries
//! in ascending row-key order, the most recent version of a key always sorts
//! first:
//!
//! ```text
//! orders-17_8888888888888888886   <- latest
//! orders-17_8888888888888888887
//! orders-17_8888888888888888888   <- first write
//! ```

/// Entity version number (decreasing)
pub type Version = i64;

/// Lowest version a key can reach
pub const SMALLEST_VERSION: Version = 1_111_111_111_111_111_111;

/// Highest version, also the version of the first write to a key
pub const BIGGEST_VERSION: Version = 8_888_888_888_888_888_888;

/// Version assigned to the first write of a key
pub const STARTING_VERSION: Version = BIGGEST_VERSION;

/// Number of decimal digits in an encoded version
pub const VERSION_WIDTH: usize = 19;

/// Length of the `_<version>` suffix appended to logical row keys
pub const SUFFIX_LEN: usize = VERSION_WIDTH + 1;

/// Build the physical row key for a version of a logical row key
pub fn encode(row_key: &str, version: Version) -> String {
    debug_assert!((SMALLEST_VERSION..=BIGGEST_VERSION).contains(&version));
    format!("{}_{:0width$}", row_key, version, width = VERSION_WIDTH)
}

/// Recover the logical row key from a physical row key
pub fn decode(physical_row_key: &str) -> &str {
    let end = physical_row_key.len().saturating_sub(SUFFIX_LEN);
    physical_row_key.get(..end).unwrap_or(physical_row_key)
}

/// Extract the version encoded in a physical row key
pub fn parse_version(physical_row_key: &str) -> Option<Version> {
    let start = physical_row_key.len().checked_sub(VERSION_WIDTH)?;
    physical_row_key.get(start..)?.parse().ok()
}

/// Inclusive row-key bounds covering every version of a logical row key
pub fn key_range(row_key: &str) -> (String, String) {
    (encode(row_key, SMALLEST_VERSION), encode(row_key, BIGGEST_VERSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let physical = encode("customer-42", STARTING_VERSION);
        assert_eq!(physical, "customer-42_8888888888888888888");
        assert_eq!(decode(&physical), "customer-42");
        assert_eq!(parse_version(&physical), Some(STARTING_VERSION));
    }

    #[test]
    fn test_row_key_with_separator() {
        let physical = encode("a_b_c", STARTING_VERSION - 3);
        assert_eq!(decode(&physical), "a_b_c");
        assert_eq!(parse_version(&physical), Some(STARTING_VERSION - 3));
    }

    #[test]
    fn test_newer_versions_sort_first() {
        let mut keys: Vec<String> = (0..50)
            .map(|i| encode("k", STARTING_VERSION - i))
            .collect();
        keys.sort();
        assert_eq!(keys[0], encode("k", STARTING_VERSION - 49));
        assert_eq!(keys[49], encode("k", STARTING_VERSION));

        // Same ordering holds at the bottom of the range
        assert!(encode("k", SMALLEST_VERSION) < encode("k", SMALLEST_VERSION + 1));
    }

    #[test]
    fn test_key_range_bounds_all_versions() {
        let (lower, upper) = key_range("k");
        for version in [SMALLEST_VERSION, STARTING_VERSION - 1000, BIGGEST_VERSION] {
            let key = encode("k", version);
            assert!(lower <= key && key <= upper);
        }
        assert!(encode("j", STARTING_VERSION) < lower);
        assert!(encode("l", SMALLEST_VERSION) > upper);
    }
}
