use std::collections::BTreeSet;

/// Runs longer than this are written as `a-b`.
const MIN_RANGE_RUN: usize = 3;

/// Parses `"1, 3-5, 9"` into a page set bounded by `[1, total_pages]`.
///
/// Parsing is permissive: malformed, reversed or out-of-bounds tokens are
/// dropped instead of failing the whole string.
pub fn parse_page_ranges(input: &str, total_pages: u32) -> BTreeSet<u32> {
    let mut pages = BTreeSet::new();

    for token in input.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        match token.split_once('-') {
            Some((start, end)) => {
                let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>())
                else {
                    continue;
                };
                if start == 0 || start > end || end > total_pages {
                    continue;
                }
                pages.extend(start..=end);
            }
            None => {
                if let Ok(page) = token.parse::<u32>() {
                    if page >= 1 && page <= total_pages {
                        pages.insert(page);
                    }
                }
            }
        }
    }

    pages
}

/// Renders a page set in canonical form. Runs of one or two pages are
/// listed individually, so `{4, 5}` becomes `"4, 5"` and `{4, 5, 6}` becomes `"4-6"`.
pub fn compress_page_ranges(pages: &BTreeSet<u32>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = pages.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }

        let run_len = (end - start + 1) as usize;
        if run_len >= MIN_RANGE_RUN {
            parts.push(format!("{start}-{end}"));
        } else {
            parts.extend((start..=end).map(|p| p.to_string()));
        }
    }

    parts.join(", ")
}

pub fn normalize_page_ranges(input: &str, total_pages: u32) -> String {
    compress_page_ranges(&parse_page_ranges(input, total_pages))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pages: &[u32]) -> BTreeSet<u32> {
        pages.iter().copied().collect()
    }

    #[test]
    fn test_compress_canonical_forms() {
        assert_eq!(compress_page_ranges(&set(&[4, 5])), "4, 5");
        assert_eq!(compress_page_ranges(&set(&[4, 5, 6])), "4-6");
        assert_eq!(compress_page_ranges(&set(&[1, 3, 5])), "1, 3, 5");
        assert_eq!(compress_page_ranges(&set(&[])), "");
        assert_eq!(compress_page_ranges(&set(&[1, 2, 3, 7, 8, 10])), "1-3, 7, 8, 10");
    }

    #[test]
    fn test_parse_mixed_tokens() {
        assert_eq!(parse_page_ranges("1, 3-5, 9", 10), set(&[1, 3, 4, 5, 9]));
        assert_eq!(parse_page_ranges(" 2 ,2, 4 - 5 ", 10), set(&[2, 4, 5]));
    }

    #[test]
    fn test_parse_drops_invalid_tokens() {
        assert_eq!(parse_page_ranges("0, 11, abc, 5-3, 2", 10), set(&[2]));
        assert_eq!(parse_page_ranges("8-12, 1", 10), set(&[1]));
        assert_eq!(parse_page_ranges("-3, 4-, 1-2-3", 10), set(&[]));
        assert!(parse_page_ranges("1-3", 0).is_empty());
    }

    #[test]
    fn test_normalize_merges_overlaps() {
        assert_eq!(normalize_page_ranges("5, 1-3, 3, 4", 10), "1-5");
        assert_eq!(normalize_page_ranges("9, 8", 10), "8, 9");
    }
}
