use serde::{Deserialize, Serialize};
use url::Url;

const STANDARD_TYPES: &[&str] = &["image", "media", "font"];

const AGGRESSIVE_TYPES: &[&str] = &[
    "image",
    "media",
    "font",
    "stylesheet",
    "websocket",
    "manifest",
    "ping",
    "prefetch",
    "cspviolationreport",
    "texttrack",
];

const TRACKER_DOMAINS: &[&str] = &[
    "google-analytics.com",
    "analytics.google.com",
    "googletagmanager.com",
    "doubleclick.net",
    "facebook.com",
    "facebook.net",
    "twitter.com",
    "hotjar.com",
    "mixpanel.com",
    "segment.com",
    "segment.io",
];

/// Which sub-resources a rendered page may load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingProfile {
    #[default]
    Standard,
    Aggressive,
}

impl BlockingProfile {
    fn blocked_types(&self) -> &'static [&'static str] {
        match self {
            BlockingProfile::Standard => STANDARD_TYPES,
            BlockingProfile::Aggressive => AGGRESSIVE_TYPES,
        }
    }

    /// `resource_type` is the lower-cased CDP resource type. Allow-list
    /// substrings matching the type or the URL always win.
    pub fn should_block(&self, resource_type: &str, url: &str, allow_list: &[String]) -> bool {
        let resource_type = resource_type.to_ascii_lowercase();
        if resource_type == "document" {
            return false;
        }
        let lowered_url = url.to_ascii_lowercase();
        if allow_list
            .iter()
            .any(|allowed| resource_type.contains(allowed.as_str()) || lowered_url.contains(allowed.as_str()))
        {
            return false;
        }
        self.blocked_types().contains(&resource_type.as_str()) || is_tracker(url)
    }
}

pub fn is_tracker(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    TRACKER_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_blocks_heavy_media_and_trackers() {
        let profile = BlockingProfile::Standard;
        assert!(profile.should_block("image", "https://site.test/logo.png", &[]));
        assert!(profile.should_block("font", "https://site.test/f.woff2", &[]));
        assert!(profile.should_block(
            "script",
            "https://www.googletagmanager.com/gtm.js",
            &[]
        ));
        assert!(!profile.should_block("stylesheet", "https://site.test/app.css", &[]));
        assert!(!profile.should_block("xhr", "https://site.test/api/schedule", &[]));
        assert!(!profile.should_block("document", "https://facebook.com/", &[]));
    }

    #[test]
    fn aggressive_adds_styles_and_sockets() {
        let profile = BlockingProfile::Aggressive;
        assert!(profile.should_block("stylesheet", "https://site.test/app.css", &[]));
        assert!(profile.should_block("websocket", "wss://site.test/live", &[]));
        assert!(!profile.should_block("fetch", "https://site.test/api/schedule", &[]));
    }

    #[test]
    fn allow_list_overrides_blocking() {
        let allow = vec!["image".to_string(), "hotjar".to_string()];
        let profile = BlockingProfile::Aggressive;
        assert!(!profile.should_block("image", "https://site.test/track-map.svg", &allow));
        assert!(!profile.should_block("script", "https://static.hotjar.com/c.js", &allow));
        assert!(profile.should_block("font", "https://site.test/f.woff2", &allow));
    }

    #[test]
    fn tracker_match_requires_domain_boundary() {
        assert!(is_tracker("https://connect.facebook.net/sdk.js"));
        assert!(!is_tracker("https://notfacebook.com/"));
        assert!(!is_tracker("not a url"));
    }
}
