//! Automated-challenge page detection.

/// Substrings that only appear on interstitial challenge pages.
pub const MARKERS: [&str; 8] = [
    "Just a moment",
    "cf-challenge",
    "challenge-platform",
    "Checking your browser",
    "cf_chl_opt",
    "Attention Required",
    "_Incapsula_Resource",
    "px-captcha",
];

/// Returns the first challenge marker found in `content`.
pub fn detect(content: &str) -> Option<&'static str> {
    MARKERS.iter().copied().find(|marker| content.contains(marker))
}
