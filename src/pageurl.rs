//! Pure URL/filename helpers: candidate normalization, page-number inference
//! and predictable URL construction for sites with fixed image naming.

use regex::Regex;

/// Strip the query string and fragment from a URL.
pub fn strip_query(url: &str) -> &str {
    let end = url
        .find('?')
        .or_else(|| url.find('#'))
        .unwrap_or(url.len());
    &url[..end]
}

/// Last path segment of a URL, query/fragment already ignored.
pub fn filename_of(url: &str) -> &str {
    let clean = strip_query(url);
    clean.rsplit('/').next().unwrap_or(clean)
}

/// Lowercased extension of a filename, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Infer a page number from a filename like `001.jpg` or `page-5.png`.
///
/// A pure numeric stem parses directly; otherwise the trailing digit run of
/// the stem is taken. Filenames with no digits yield None and the candidate
/// cannot be ordered or range-filtered.
pub fn page_number(filename: &str) -> Option<u32> {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => filename,
    };
    if !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()) {
        return stem.parse().ok();
    }
    let re = Regex::new(r"(\d+)$").unwrap();
    re.captures(stem)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Zero-padded destination filename for the direct-URL-construction path.
pub fn padded_filename(page: u32, pad: usize, ext: &str) -> String {
    format!("{:0width$}.{}", page, ext.trim_start_matches('.'), width = pad)
}

/// Predictable image URL for sites with a fixed `{base}/{slug}/{chapter}/NNN.ext`
/// naming convention.
pub fn build_page_url(image_base: &str, slug: &str, chapter: &str, page: u32, pad: usize, ext: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        image_base.trim_end_matches('/'),
        slug,
        chapter,
        padded_filename(page, pad, ext)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_and_fragment() {
        assert_eq!(
            strip_query("https://cdn.example.com/001.jpg?x=1&y=2"),
            "https://cdn.example.com/001.jpg"
        );
        assert_eq!(
            strip_query("https://cdn.example.com/001.jpg#frag"),
            "https://cdn.example.com/001.jpg"
        );
        assert_eq!(
            strip_query("https://cdn.example.com/001.jpg"),
            "https://cdn.example.com/001.jpg"
        );
    }

    #[test]
    fn filename_ignores_query() {
        assert_eq!(filename_of("https://cdn.example.com/a/b/003.webp?v=9"), "003.webp");
        assert_eq!(filename_of("003.webp"), "003.webp");
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("001.JPG"), Some("jpg".to_string()));
        assert_eq!(extension_of("cover.webp"), Some("webp".to_string()));
        assert_eq!(extension_of("no-extension"), None);
    }

    #[test]
    fn numeric_stem_parses_directly() {
        assert_eq!(page_number("001.jpg"), Some(1));
        assert_eq!(page_number("042.png"), Some(42));
        assert_eq!(page_number("7.webp"), Some(7));
    }

    #[test]
    fn trailing_digits_are_extracted() {
        assert_eq!(page_number("page-5.png"), Some(5));
        assert_eq!(page_number("demo_chapter_1_012.jpg"), Some(12));
        assert_eq!(page_number("scan003.webp"), Some(3));
    }

    #[test]
    fn no_digits_yields_none() {
        assert_eq!(page_number("cover.jpg"), None);
        assert_eq!(page_number("logo.png"), None);
    }

    #[test]
    fn digits_before_suffix_are_not_trailing() {
        // The digit run must terminate the stem.
        assert_eq!(page_number("5-cover.jpg"), None);
    }

    #[test]
    fn padded_filenames() {
        assert_eq!(padded_filename(1, 3, "jpg"), "001.jpg");
        assert_eq!(padded_filename(12, 3, ".png"), "012.png");
        assert_eq!(padded_filename(7, 0, "webp"), "7.webp");
    }

    #[test]
    fn builds_predictable_urls() {
        assert_eq!(
            build_page_url("https://img.example.com/", "demo-series", "chapter-1", 4, 3, "jpg"),
            "https://img.example.com/demo-series/chapter-1/004.jpg"
        );
    }
}
