//! Gestalt (Ratcliff/Obershelp) string similarity.
//!
//! `ratio` counts the characters covered by recursively matched common runs
//! and normalizes by the combined length, giving a score in `[0, 1]`. The
//! recursive matcher picks the leftmost longest run in its first argument, so
//! the score is taken in both directions to keep the function symmetric.

/// Similarity of two strings in `[0, 1]`; `1.0` for equal strings.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let forward = matching_chars(&a, &b);
    let backward = matching_chars(&b, &a);
    2.0 * forward.max(backward) as f64 / total as f64
}

/// Case-insensitive variant used when comparing titles.
pub fn ratio_ignore_case(a: &str, b: &str) -> f64 {
    ratio(&a.to_lowercase(), &b.to_lowercase())
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (start_a, start_b, len) = longest_common_run(a, b);
    if len == 0 {
        return 0;
    }

    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

fn longest_common_run(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // lengths[j + 1] holds the run length ending at a[i - 1], b[j]
    let mut lengths = vec![0usize; b.len() + 1];

    for i in 0..a.len() {
        let mut next = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                let run = lengths[j] + 1;
                next[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        lengths = next;
    }

    best
}
